use axum::http::{self, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, TEST_TOKEN};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn authed(method: &str, uri: &str, body: &str) -> Request<String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::AUTHORIZATION, format!("Basic {TEST_TOKEN}"))
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(body.to_string())
        .unwrap()
}

// --- auth ---

#[tokio::test]
async fn health_needs_no_token() {
    let resp = app()
        .oneshot(Request::builder().uri("/").body(String::new()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, json!({"status": "ok"}));
}

#[tokio::test]
async fn missing_token_is_401() {
    let resp = app()
        .oneshot(Request::builder().uri("/v2/user").body(String::new()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await["message"], "Invalid API token");
}

#[tokio::test]
async fn wrong_token_is_401() {
    let request = Request::builder()
        .uri("/v2/user")
        .header(http::header::AUTHORIZATION, "Basic nope")
        .body(String::new())
        .unwrap();
    let resp = app().oneshot(request).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

// --- companies ---

#[tokio::test]
async fn search_filters_by_query_pairs() {
    let uri = "/v2/companies?query%5B0%5D%5Battribute%5D=about.industries&query%5B0%5D%5Boperator%5D=or\
               &query%5B0%5D%5Bsign%5D=equals&query%5B0%5D%5Bvalues%5D%5B0%5D=saas&size=2";
    let resp = app().oneshot(authed("GET", uri, "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    let data = &body["data"];
    assert_eq!(data["companies"].as_array().unwrap().len(), 2);
    assert_eq!(data["meta"]["total"], 3);
    assert_eq!(data["meta"]["perPage"], 2);
    assert_eq!(data["meta"]["lastPage"], 2);
}

#[tokio::test]
async fn search_post_reads_the_json_body() {
    let body = r#"{"query":[{"attribute":"locations.headquarters.country.code","operator":"or","sign":"equals","values":["de","fr"]}]}"#;
    let resp = app().oneshot(authed("POST", "/v2/companies", body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    let domains: Vec<&str> = body["data"]["companies"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["domain"]["domain"].as_str().unwrap())
        .collect();
    assert_eq!(domains, ["globex.io", "umbrella.fr"]);
}

#[tokio::test]
async fn invalid_sign_is_400() {
    let uri = "/v2/companies?query%5B0%5D%5Battribute%5D=about.name&query%5B0%5D%5Bsign%5D=like\
               &query%5B0%5D%5Bvalues%5D%5B0%5D=a";
    let resp = app().oneshot(authed("GET", uri, "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn count_matches_search() {
    let resp = app()
        .oneshot(authed("GET", "/v2/companies/count?search=ini", ""))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await, json!({"count": 1}));
}

#[tokio::test]
async fn fetch_company_by_domain() {
    let resp = app().oneshot(authed("GET", "/v2/companies/acme.com", "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["about"]["name"], "Acme");
}

#[tokio::test]
async fn unknown_company_is_404_with_message() {
    let resp = app().oneshot(authed("GET", "/v2/companies/nope.com", "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(resp).await["message"], "Company not found");
}

#[tokio::test]
async fn company_by_email_uses_the_host() {
    let resp = app()
        .oneshot(authed("GET", "/v2/companies/by-email?email=jane%40globex.io", ""))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["id"], 2);
}

// --- lists ---

#[tokio::test]
async fn create_list_returns_201() {
    let resp = app()
        .oneshot(authed("POST", "/v2/lists", r#"{"name":"Targets"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let list = body_json(resp).await;
    assert_eq!(list["name"], "Targets");
    assert_eq!(list["type"], "companies");
    assert_eq!(list["dynamic"], false);
}

#[tokio::test]
async fn update_missing_list_is_404() {
    let resp = app()
        .oneshot(authed("PUT", "/v2/lists/99", r#"{"name":"x"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn lists_answer_unwrapped() {
    let resp = app().oneshot(authed("GET", "/v2/lists", "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert!(body.get("data").is_none());
    assert_eq!(body["lists"], json!([]));
    assert_eq!(body["meta"]["total"], 0);
}

#[tokio::test]
async fn delete_missing_list_is_404() {
    let resp = app().oneshot(authed("DELETE", "/v2/lists/99", "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// --- faults ---

#[tokio::test]
async fn throttled_sets_retry_after() {
    let resp = app().oneshot(authed("GET", "/v2/__faults/throttled", "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(resp.headers()[http::header::RETRY_AFTER], "7");
}

#[tokio::test]
async fn garbage_is_not_json() {
    let resp = app().oneshot(authed("GET", "/v2/__faults/garbage", "")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body_bytes(resp).await;
    assert!(serde_json::from_slice::<Value>(&bytes).is_err());
}

#[tokio::test]
async fn unavailable_is_503() {
    let resp = app()
        .oneshot(authed("POST", "/v2/__faults/unavailable", "{}"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}
