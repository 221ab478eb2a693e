//! In-memory stand-in for The Companies API, used by the client's
//! integration tests.
//!
//! Serves a fixed set of companies, a mutable set of lists and a few fault
//! endpoints under `/v2/__faults/` (persistent 503, 429 with `retry-after`,
//! slow response, non-JSON body). Everything under `/v2` requires
//! `authorization: Basic <token>`.

pub mod filter;
pub mod fixtures;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Path, RawQuery, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};

use crate::filter::Condition;

pub const TEST_TOKEN: &str = "test-token";
pub const SLOW_RESPONSE: Duration = Duration::from_millis(500);
pub const THROTTLE_RETRY_AFTER: u64 = 7;

const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyList {
    pub id: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub list_type: String,
    pub dynamic: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query: Vec<Condition>,
}

#[derive(Deserialize)]
pub struct CreateList {
    pub name: String,
    #[serde(default, rename = "type")]
    pub list_type: Option<String>,
    #[serde(default)]
    pub dynamic: Option<bool>,
    #[serde(default)]
    pub query: Vec<Condition>,
}

#[derive(Deserialize)]
pub struct UpdateList {
    pub name: Option<String>,
    pub query: Option<Vec<Condition>>,
}

/// Body of the POST forms of search and count.
#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchBody {
    #[serde(default)]
    pub query: Vec<Condition>,
    pub search: Option<String>,
    pub page: Option<usize>,
    pub size: Option<usize>,
}

pub struct Db {
    token: String,
    companies: Vec<Value>,
    lists: RwLock<BTreeMap<u64, CompanyList>>,
    next_list_id: AtomicU64,
    hits: Mutex<HashMap<&'static str, u64>>,
}

pub type AppState = Arc<Db>;

impl Db {
    pub fn new(token: impl Into<String>) -> AppState {
        Arc::new(Db {
            token: token.into(),
            companies: fixtures::companies(),
            lists: RwLock::new(BTreeMap::new()),
            next_list_id: AtomicU64::new(1),
            hits: Mutex::new(HashMap::new()),
        })
    }

    fn hit(&self, name: &'static str) -> u64 {
        let mut hits = self.hits.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let count = hits.entry(name).or_default();
        *count += 1;
        *count
    }
}

/// A JSON error body with `message`.
#[derive(Debug)]
pub struct Failure(StatusCode, String);

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "message": self.1 }))).into_response()
    }
}

fn not_found(what: &str) -> Failure {
    Failure(StatusCode::NOT_FOUND, format!("{what} not found"))
}

pub fn app() -> Router {
    app_with_state(Db::new(TEST_TOKEN))
}

pub fn app_with_state(state: AppState) -> Router {
    let api = Router::new()
        .route("/companies", get(search_companies).post(search_companies_post))
        .route("/companies/count", get(count_companies).post(count_companies_post))
        .route("/companies/by-email", get(company_by_email))
        .route("/companies/{domain}", get(fetch_company))
        .route("/lists", get(fetch_lists).post(create_list))
        .route("/lists/{list_id}", put(update_list).delete(delete_list))
        .route("/user", get(fetch_user))
        .route("/__faults/unavailable", get(unavailable).post(unavailable))
        .route("/__faults/throttled", get(throttled))
        .route("/__faults/slow", get(slow))
        .route("/__faults/garbage", get(garbage))
        .route("/__faults/hits", get(hits))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/", get(health))
        .nest("/v2", api)
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with_state(listener, Db::new(TEST_TOKEN)).await
}

pub async fn run_with_state(listener: TcpListener, state: AppState) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "mock api listening");
    }
    axum::serve(listener, app_with_state(state)).await
}

async fn require_token(State(db): State<AppState>, request: Request, next: Next) -> Response {
    let expected = format!("Basic {}", db.token);
    let given = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    if given == Some(expected.as_str()) {
        next.run(request).await
    } else {
        debug!(path = %request.uri().path(), "rejected request without a valid token");
        Failure(StatusCode::UNAUTHORIZED, "Invalid API token".to_string()).into_response()
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn query_pairs(raw: Option<String>) -> Vec<(String, String)> {
    url::form_urlencoded::parse(raw.unwrap_or_default().as_bytes())
        .into_owned()
        .collect()
}

fn scalar(pairs: &[(String, String)], key: &str) -> Option<String> {
    pairs.iter().find(|(name, _)| name == key).map(|(_, value)| value.clone())
}

fn number(pairs: &[(String, String)], key: &str) -> Result<Option<usize>, Failure> {
    scalar(pairs, key)
        .map(|value| {
            value
                .parse()
                .map_err(|_| Failure(StatusCode::BAD_REQUEST, format!("`{key}` must be a positive integer")))
        })
        .transpose()
}

impl SearchBody {
    fn from_query(raw: Option<String>) -> Result<SearchBody, Failure> {
        let pairs = query_pairs(raw);
        let query = filter::from_query_pairs("query", &pairs).map_err(|e| Failure(StatusCode::BAD_REQUEST, e))?;
        Ok(SearchBody {
            query,
            search: scalar(&pairs, "search"),
            page: number(&pairs, "page")?,
            size: number(&pairs, "size")?,
        })
    }

    fn matching<'a>(&self, companies: &'a [Value]) -> Result<Vec<&'a Value>, Failure> {
        for condition in &self.query {
            condition.validate().map_err(|e| Failure(StatusCode::BAD_REQUEST, e))?;
        }
        let search = self.search.as_deref().map(str::to_lowercase);
        Ok(companies
            .iter()
            .filter(|company| self.query.iter().all(|condition| condition.matches(company)))
            .filter(|company| match &search {
                Some(needle) => [&company["about"]["name"], &company["domain"]["domain"]]
                    .iter()
                    .filter_map(|v| v.as_str())
                    .any(|haystack| haystack.to_lowercase().contains(needle)),
                None => true,
            })
            .collect())
    }
}

fn page_of<T: Serialize>(resource: &str, items: &[T], page: Option<usize>, size: Option<usize>) -> Value {
    let size = size.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
    let page = page.unwrap_or(1).max(1);
    let total = items.len();
    let slice: Vec<&T> = items.iter().skip((page - 1).saturating_mul(size)).take(size).collect();
    let mut body = Map::new();
    body.insert(resource.to_string(), json!(slice));
    body.insert(
        "meta".to_string(),
        json!({
            "currentPage": page,
            "perPage": size,
            "total": total,
            "lastPage": total.div_ceil(size).max(1),
        }),
    );
    Value::Object(body)
}

fn search_response(db: &Db, body: SearchBody) -> Result<Json<Value>, Failure> {
    let found = body.matching(&db.companies)?;
    debug!(conditions = body.query.len(), found = found.len(), "search");
    // Search answers in the wrapped shape; lists answer unwrapped.
    Ok(Json(json!({ "data": page_of("companies", &found, body.page, body.size) })))
}

fn count_response(db: &Db, body: SearchBody) -> Result<Json<Value>, Failure> {
    let count = body.matching(&db.companies)?.len();
    Ok(Json(json!({ "count": count })))
}

async fn search_companies(State(db): State<AppState>, RawQuery(raw): RawQuery) -> Result<Json<Value>, Failure> {
    search_response(&db, SearchBody::from_query(raw)?)
}

async fn search_companies_post(State(db): State<AppState>, Json(body): Json<SearchBody>) -> Result<Json<Value>, Failure> {
    search_response(&db, body)
}

async fn count_companies(State(db): State<AppState>, RawQuery(raw): RawQuery) -> Result<Json<Value>, Failure> {
    count_response(&db, SearchBody::from_query(raw)?)
}

async fn count_companies_post(State(db): State<AppState>, Json(body): Json<SearchBody>) -> Result<Json<Value>, Failure> {
    count_response(&db, body)
}

fn find_company<'a>(db: &'a Db, domain: &str) -> Option<&'a Value> {
    db.companies
        .iter()
        .find(|company| company["domain"]["domain"].as_str() == Some(domain))
}

async fn fetch_company(State(db): State<AppState>, Path(domain): Path<String>) -> Result<Json<Value>, Failure> {
    find_company(&db, &domain)
        .cloned()
        .map(Json)
        .ok_or_else(|| not_found("Company"))
}

async fn company_by_email(State(db): State<AppState>, RawQuery(raw): RawQuery) -> Result<Json<Value>, Failure> {
    let pairs = query_pairs(raw);
    let email = scalar(&pairs, "email").ok_or_else(|| Failure(StatusCode::BAD_REQUEST, "`email` is required".to_string()))?;
    let domain = email
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .ok_or_else(|| Failure(StatusCode::BAD_REQUEST, format!("`{email}` is not an email address")))?;
    find_company(&db, domain)
        .cloned()
        .map(Json)
        .ok_or_else(|| not_found("Company"))
}

async fn fetch_lists(State(db): State<AppState>, RawQuery(raw): RawQuery) -> Result<Json<Value>, Failure> {
    let pairs = query_pairs(raw);
    let lists: Vec<CompanyList> = db.lists.read().await.values().cloned().collect();
    Ok(Json(page_of("lists", &lists, number(&pairs, "page")?, number(&pairs, "size")?)))
}

async fn create_list(State(db): State<AppState>, Json(input): Json<CreateList>) -> (StatusCode, Json<CompanyList>) {
    let list = CompanyList {
        id: db.next_list_id.fetch_add(1, Ordering::Relaxed),
        name: input.name,
        list_type: input.list_type.unwrap_or_else(|| "companies".to_string()),
        dynamic: input.dynamic.unwrap_or(false),
        query: input.query,
    };
    db.lists.write().await.insert(list.id, list.clone());
    (StatusCode::CREATED, Json(list))
}

async fn update_list(
    State(db): State<AppState>,
    Path(list_id): Path<u64>,
    Json(input): Json<UpdateList>,
) -> Result<Json<CompanyList>, Failure> {
    let mut lists = db.lists.write().await;
    let list = lists.get_mut(&list_id).ok_or_else(|| not_found("List"))?;
    if let Some(name) = input.name {
        list.name = name;
    }
    if let Some(query) = input.query {
        list.query = query;
    }
    Ok(Json(list.clone()))
}

async fn delete_list(State(db): State<AppState>, Path(list_id): Path<u64>) -> Result<StatusCode, Failure> {
    let mut lists = db.lists.write().await;
    lists
        .remove(&list_id)
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or_else(|| not_found("List"))
}

async fn fetch_user() -> Json<Value> {
    Json(json!({ "id": 1, "email": "dev@example.com", "firstName": "Dev" }))
}

async fn unavailable(State(db): State<AppState>) -> Failure {
    let count = db.hit("unavailable");
    debug!(count, "serving 503");
    Failure(StatusCode::SERVICE_UNAVAILABLE, "Service unavailable".to_string())
}

async fn throttled() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, THROTTLE_RETRY_AFTER.to_string())],
        Json(json!({ "message": "Too many requests" })),
    )
        .into_response()
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(SLOW_RESPONSE).await;
    Json(json!({ "status": "late" }))
}

async fn garbage() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/html")],
        "<html><body>upstream proxy error</body></html>",
    )
        .into_response()
}

async fn hits(State(db): State<AppState>) -> Json<Value> {
    let hits = db.hits.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    Json(json!(&*hits))
}
