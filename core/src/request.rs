//! Turns an `OperationSpec` plus call arguments into an `HttpRequest`.
//!
//! # Design
//! All validation happens here, before any I/O: undeclared argument keys,
//! missing required parameters, wrongly typed values and malformed filters
//! are reported without a request ever reaching the transport.
//!
//! Parameters are emitted in the order the catalog declares them, not the
//! order the caller supplied them, so two logically equal calls always
//! produce byte-identical requests.
//!
//! # Query encoding
//! One rule covers every query value: scalars become `key=value`
//! (booleans as `true`/`false`), arrays become `key[0]=…&key[1]=…`, objects
//! become `key[field]=…`, and nulls or empty containers are left out.
//! Indexed brackets are used for arrays instead of repeated keys or
//! comma-joined values, so plain array params and filter groups share one
//! shape and element order survives any proxy that reorders pairs.

use serde_json::{Map, Value};
use url::Url;

use crate::catalog::{OperationSpec, ParamKind, ParamLocation, ParamSpec, PathSegment};
use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::filter::{EncodedFilter, FilterEncoding, FilterGroup};
use crate::http::HttpRequest;

/// Call-time arguments, keyed by parameter name.
pub type Args = Map<String, Value>;

/// Resolves operations against one API base URL and version.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    base_url: Url,
    api_version: String,
}

impl RequestBuilder {
    pub fn new(api_url: &str, api_version: &str) -> Result<Self, ApiError> {
        let base_url = Url::parse(api_url.trim_end_matches('/'))
            .map_err(|e| ApiError::Config(format!("invalid api_url `{api_url}`: {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            return Err(ApiError::Config(format!("api_url `{api_url}` must be an http(s) URL")));
        }
        if base_url.query().is_some() || base_url.fragment().is_some() {
            return Err(ApiError::Config(format!(
                "api_url `{api_url}` must not carry a query or fragment"
            )));
        }
        if api_version.is_empty() || api_version.contains('/') {
            return Err(ApiError::Config(format!("invalid api_version `{api_version}`")));
        }
        Ok(Self {
            base_url,
            api_version: api_version.to_string(),
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        Self::new(&config.api_url, &config.api_version)
    }

    pub fn build(&self, spec: &OperationSpec, args: &Args) -> Result<HttpRequest, ApiError> {
        if let Some(name) = args.keys().find(|name| spec.param(name).is_none()) {
            return Err(ApiError::UnknownParameter {
                operation: spec.id.clone(),
                name: name.clone(),
            });
        }

        let present = |name: &str| args.get(name).filter(|value| !value.is_null());

        for param in &spec.params {
            match present(&param.name) {
                Some(value) => check_kind(spec, param, value)?,
                None if param.required => {
                    return Err(ApiError::MissingParameter {
                        operation: spec.id.clone(),
                        name: param.name.clone(),
                    })
                }
                None => {}
            }
        }

        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| ApiError::Config(format!("api_url `{}` cannot carry a path", self.base_url)))?;
            segments.pop_if_empty();
            if spec.versioned {
                segments.push(&self.api_version);
            }
            for segment in &spec.path {
                match segment {
                    PathSegment::Literal(literal) => {
                        segments.push(literal);
                    }
                    PathSegment::Param(name) => {
                        let value = present(name).ok_or_else(|| ApiError::MissingParameter {
                            operation: spec.id.clone(),
                            name: name.clone(),
                        })?;
                        segments.push(&path_value(spec, name, value)?);
                    }
                }
            }
        }

        let carries_body = spec.method.carries_body();
        let mut query = Vec::new();
        let mut body = Map::new();
        for param in spec.params.iter().filter(|param| param.location != ParamLocation::Path) {
            let Some(value) = present(&param.name) else { continue };
            let in_body = param.location == ParamLocation::Body && carries_body;

            if param.kind == ParamKind::Filter {
                let encoding = if in_body {
                    FilterEncoding::JsonBody
                } else {
                    FilterEncoding::QueryString
                };
                match FilterGroup::from_value(value)?.encode(&param.name, encoding) {
                    Some(EncodedFilter::Query(pairs)) => query.extend(pairs),
                    Some(EncodedFilter::Body(filter)) => {
                        body.insert(param.name.clone(), filter);
                    }
                    None => {}
                }
            } else if in_body {
                body.insert(param.name.clone(), value.clone());
            } else {
                flatten_query(&param.name, value, &mut query);
            }
        }

        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(&query);
        }

        let (headers, body) = if carries_body {
            (
                vec![("content-type".to_string(), "application/json".to_string())],
                Some(Value::Object(body).to_string()),
            )
        } else {
            (Vec::new(), None)
        };

        Ok(HttpRequest {
            method: spec.method,
            url: url.into(),
            headers,
            body,
        })
    }
}

/// Append `value` under `key` following the query encoding rule above.
pub fn flatten_query(key: &str, value: &Value, pairs: &mut Vec<(String, String)>) {
    match value {
        Value::Null => {}
        Value::Bool(b) => pairs.push((key.to_string(), b.to_string())),
        Value::Number(n) => pairs.push((key.to_string(), n.to_string())),
        Value::String(s) => pairs.push((key.to_string(), s.clone())),
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                flatten_query(&format!("{key}[{index}]"), item, pairs);
            }
        }
        Value::Object(fields) => {
            for (field, item) in fields {
                flatten_query(&format!("{key}[{field}]"), item, pairs);
            }
        }
    }
}

fn path_value(spec: &OperationSpec, name: &str, value: &Value) -> Result<String, ApiError> {
    match value {
        Value::String(s) if s.is_empty() => Err(ApiError::MissingParameter {
            operation: spec.id.clone(),
            name: name.to_string(),
        }),
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(ApiError::InvalidArgument {
            operation: spec.id.clone(),
            name: name.to_string(),
            message: format!("path parameters must be scalars, got {}", json_type(other)),
        }),
    }
}

fn check_kind(spec: &OperationSpec, param: &ParamSpec, value: &Value) -> Result<(), ApiError> {
    let (expected, ok) = match param.kind {
        ParamKind::String => ("a string", value.is_string()),
        ParamKind::Integer => ("an integer", value.is_i64() || value.is_u64()),
        ParamKind::Number => ("a number", value.is_number()),
        ParamKind::Boolean => ("a boolean", value.is_boolean()),
        ParamKind::Array => ("an array", value.is_array()),
        ParamKind::Object => ("an object", value.is_object()),
        ParamKind::Filter => return Ok(()),
    };
    if ok {
        return Ok(());
    }
    Err(ApiError::InvalidArgument {
        operation: spec.id.clone(),
        name: param.name.clone(),
        message: format!("expected {expected}, got {}", json_type(value)),
    })
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::http::HttpMethod;
    use serde_json::json;

    fn builder() -> RequestBuilder {
        RequestBuilder::new("https://api.example.com", "v2").unwrap()
    }

    fn args(value: Value) -> Args {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    fn build(operation: &str, value: Value) -> Result<HttpRequest, ApiError> {
        let catalog = Catalog::embedded().unwrap();
        builder().build(catalog.lookup(operation).unwrap(), &args(value))
    }

    #[test]
    fn health_check_hits_the_root() {
        let req = build("fetchApiHealth", json!({})).unwrap();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url, "https://api.example.com/");
        assert!(req.body.is_none());
        assert!(req.headers.is_empty());
    }

    #[test]
    fn path_parameters_are_substituted() {
        let req = build("fetchCompany", json!({"domain": "microsoft.com"})).unwrap();
        assert_eq!(req.url, "https://api.example.com/v2/companies/microsoft.com");
    }

    #[test]
    fn path_values_are_percent_encoded() {
        let req = build("fetchCompanyContext", json!({"domain": "a b/c"})).unwrap();
        assert_eq!(req.url, "https://api.example.com/v2/companies/a%20b%2Fc/context");
    }

    #[test]
    fn integer_path_parameters_render_as_digits() {
        let req = build("retryAction", json!({"actionId": 981})).unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.url, "https://api.example.com/v2/actions/981/retry");
        assert_eq!(req.body.as_deref(), Some("{}"));
    }

    #[test]
    fn missing_path_parameter_fails() {
        let err = build("fetchCompany", json!({"simplified": true})).unwrap_err();
        assert!(matches!(err, ApiError::MissingParameter { ref name, .. } if name == "domain"));
    }

    #[test]
    fn null_counts_as_missing() {
        let err = build("fetchCompany", json!({"domain": null})).unwrap_err();
        assert!(matches!(err, ApiError::MissingParameter { .. }));
    }

    #[test]
    fn empty_path_value_counts_as_missing() {
        let err = build("fetchCompany", json!({"domain": ""})).unwrap_err();
        assert!(matches!(err, ApiError::MissingParameter { .. }));
    }

    #[test]
    fn missing_required_query_parameter_fails() {
        let err = build("fetchCompanyByEmail", json!({})).unwrap_err();
        assert!(matches!(err, ApiError::MissingParameter { ref name, .. } if name == "email"));
    }

    #[test]
    fn undeclared_argument_is_rejected() {
        let err = build("searchCompanies", json!({"sise": 10})).unwrap_err();
        assert!(matches!(err, ApiError::UnknownParameter { ref name, .. } if name == "sise"));
    }

    #[test]
    fn wrongly_typed_argument_is_rejected() {
        let err = build("searchCompanies", json!({"size": "ten"})).unwrap_err();
        match err {
            ApiError::InvalidArgument { name, message, .. } => {
                assert_eq!(name, "size");
                assert_eq!(message, "expected an integer, got a string");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn query_follows_declared_order() {
        let req = build(
            "searchCompanies",
            json!({"size": 25, "search": "acme", "page": 2, "simplified": true}),
        )
        .unwrap();
        assert_eq!(
            req.url,
            "https://api.example.com/v2/companies?search=acme&page=2&size=25&simplified=true"
        );
    }

    #[test]
    fn arrays_use_indexed_keys() {
        let req = build("searchCompanies", json!({"searchFields": ["about.name", "domain.domain"]})).unwrap();
        assert_eq!(
            req.query(),
            Some("searchFields%5B0%5D=about.name&searchFields%5B1%5D=domain.domain")
        );
    }

    #[test]
    fn filters_are_flattened_into_the_query() {
        let req = build(
            "searchCompanies",
            json!({
                "query": [{"attribute": "about.industries", "operator": "or", "sign": "equals", "values": ["computer-software"]}],
                "size": 25
            }),
        )
        .unwrap();
        assert_eq!(
            req.query(),
            Some(concat!(
                "query%5B0%5D%5Battribute%5D=about.industries",
                "&query%5B0%5D%5Boperator%5D=or",
                "&query%5B0%5D%5Bsign%5D=equals",
                "&query%5B0%5D%5Bvalues%5D%5B0%5D=computer-software",
                "&size=25"
            ))
        );
    }

    #[test]
    fn empty_filter_is_omitted() {
        let get = build("searchCompanies", json!({"query": [], "size": 5})).unwrap();
        assert_eq!(get.url, "https://api.example.com/v2/companies?size=5");

        let post = build("searchCompaniesPost", json!({"query": [], "size": 5})).unwrap();
        assert_eq!(post.body.as_deref(), Some(r#"{"size":5}"#));
    }

    #[test]
    fn post_puts_parameters_in_the_body() {
        let req = build(
            "searchCompaniesPost",
            json!({"size": 3, "query": [{"attribute": "about.industries", "values": ["saas"]}]}),
        )
        .unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.url, "https://api.example.com/v2/companies");
        assert_eq!(
            req.headers,
            vec![("content-type".to_string(), "application/json".to_string())]
        );
        assert_eq!(
            req.body.as_deref(),
            Some(r#"{"query":[{"attribute":"about.industries","operator":"or","sign":"equals","values":["saas"]}],"size":3}"#)
        );
    }

    #[test]
    fn mixed_locations_split_between_path_and_body() {
        let req = build(
            "askCompany",
            json!({"question": "Who are the founders?", "domain": "openai.com", "fields": ["founders"]}),
        )
        .unwrap();
        assert_eq!(req.url, "https://api.example.com/v2/companies/openai.com/ask");
        assert_eq!(
            req.body.as_deref(),
            Some(r#"{"question":"Who are the founders?","fields":["founders"]}"#)
        );
    }

    #[test]
    fn delete_never_carries_a_body() {
        let req = build("deleteList", json!({"listId": 7})).unwrap();
        assert_eq!(req.method, HttpMethod::Delete);
        assert_eq!(req.url, "https://api.example.com/v2/lists/7");
        assert!(req.body.is_none());
        assert!(req.headers.is_empty());
    }

    #[test]
    fn body_parameters_fold_into_the_query_for_get() {
        let catalog = Catalog::from_json(
            r#"{"version":"t","operations":[{"id":"previewSearch","method":"GET","path":"/preview",
                "params":[{"name":"query","in":"body","type":"filter"},{"name":"size","in":"body","type":"integer"}]}]}"#,
        )
        .unwrap();
        let req = builder()
            .build(
                catalog.lookup("previewSearch").unwrap(),
                &args(json!({"size": 1, "query": {"attribute": "domain.tld", "value": "io"}})),
            )
            .unwrap();
        assert!(req.body.is_none());
        let group = FilterGroup::from_query_string("query", req.query().unwrap()).unwrap();
        assert_eq!(group.expressions()[0].attribute, "domain.tld");
        assert!(req.url.ends_with("&size=1"));
    }

    #[test]
    fn invalid_filter_fails_the_build() {
        let err = build("countCompanies", json!({"query": [{"attribute": "a", "sign": "around", "values": [1]}]}))
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidFilter(_)));
    }

    #[test]
    fn base_path_and_trailing_slash_are_kept_clean() {
        let builder = RequestBuilder::new("https://proxy.example.com/tca/", "v2").unwrap();
        let catalog = Catalog::embedded().unwrap();
        let req = builder.build(catalog.lookup("fetchUser").unwrap(), &Args::new()).unwrap();
        assert_eq!(req.url, "https://proxy.example.com/tca/v2/user");
    }

    #[test]
    fn flatten_handles_nested_objects() {
        let mut pairs = Vec::new();
        flatten_query("meta", &json!({"a": {"b": [true, null]}, "empty": []}), &mut pairs);
        assert_eq!(pairs, vec![("meta[a][b][0]".to_string(), "true".to_string())]);
    }

    #[test]
    fn bad_base_urls_are_rejected() {
        assert!(RequestBuilder::new("ftp://example.com", "v2").is_err());
        assert!(RequestBuilder::new("not a url", "v2").is_err());
        assert!(RequestBuilder::new("https://example.com?x=1", "v2").is_err());
        assert!(RequestBuilder::new("https://example.com", "v2/beta").is_err());
    }
}
