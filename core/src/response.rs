//! Turns an `HttpResponse` into a `ResponseEnvelope` or a classified
//! `ApiError`.
//!
//! # Design
//! The normalizer is a pure function of the operation id and the response
//! data, so every status mapping is covered by unit tests without a server.
//!
//! Success bodies may or may not wrap the payload in a top-level `data`
//! field; both shapes are accepted. Pagination metadata sits next to the
//! resource collection as `meta`.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;
use crate::http::HttpResponse;

/// Longest body prefix quoted in a decode error.
const SNIPPET_CHARS: usize = 200;

/// Pagination and billing details reported next to a collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    #[serde(default, alias = "currentPage", skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    #[serde(default, alias = "perPage", skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_page: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits: Option<f64>,
}

impl PageMeta {
    fn is_empty(&self) -> bool {
        *self == PageMeta::default()
    }
}

/// A successful response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope<T = Value> {
    pub operation: String,
    pub status: u16,
    pub data: T,
    pub meta: Option<PageMeta>,
}

impl ResponseEnvelope<Value> {
    /// Deserialize the payload into `U`, keeping status and metadata.
    pub fn decode<U: DeserializeOwned>(self) -> Result<ResponseEnvelope<U>, ApiError> {
        let data = U::deserialize(&self.data).map_err(|e| {
            let body = self.data.to_string();
            ApiError::Decode {
                operation: self.operation.clone(),
                status: self.status,
                message: format!("unexpected payload shape: {e}; payload starts with {:?}", snippet(&body)),
                body,
            }
        })?;
        Ok(ResponseEnvelope {
            operation: self.operation,
            status: self.status,
            data,
            meta: self.meta,
        })
    }
}

impl<T> ResponseEnvelope<T> {
    pub fn into_data(self) -> T {
        self.data
    }
}

/// Classify `response` for `operation`.
pub fn normalize(operation: &str, response: &HttpResponse) -> Result<ResponseEnvelope, ApiError> {
    let parsed = if response.body.trim().is_empty() {
        None
    } else {
        match serde_json::from_str::<Value>(&response.body) {
            Ok(value) => Some(value),
            Err(e) => {
                return Err(ApiError::Decode {
                    operation: operation.to_string(),
                    status: response.status,
                    message: format!("{e}; body starts with {:?}", snippet(&response.body)),
                    body: response.body.clone(),
                })
            }
        }
    };

    if response.is_success() {
        let (data, outer_meta) = match parsed {
            None => (Value::Null, None),
            Some(Value::Object(mut map)) if map.contains_key("data") => {
                let meta = map.remove("meta");
                (map.remove("data").unwrap_or(Value::Null), meta)
            }
            Some(other) => (other, None),
        };
        let meta = data.get("meta").or(outer_meta.as_ref()).and_then(page_meta);
        return Ok(ResponseEnvelope {
            operation: operation.to_string(),
            status: response.status,
            data,
            meta,
        });
    }

    let operation = operation.to_string();
    let status = response.status;
    let message = parsed.as_ref().and_then(error_message).unwrap_or_else(|| {
        if response.body.trim().is_empty() {
            "empty response body".to_string()
        } else {
            snippet(&response.body)
        }
    });
    let body = response.body.clone();

    Err(match status {
        401 | 403 => ApiError::Auth {
            operation,
            status,
            message,
            body,
        },
        404 => ApiError::NotFound { operation, message, body },
        429 => ApiError::RateLimited {
            operation,
            retry_after: retry_after(response),
            body,
        },
        400..=499 => ApiError::Validation {
            operation,
            status,
            message,
            body,
        },
        _ => ApiError::Server {
            operation,
            status,
            message,
            body,
        },
    })
}

fn page_meta(value: &Value) -> Option<PageMeta> {
    serde_json::from_value::<PageMeta>(value.clone())
        .ok()
        .filter(|meta| !meta.is_empty())
}

/// `message`, `error` or `error.message`, whichever the body carries.
fn error_message(body: &Value) -> Option<String> {
    match (body.get("message"), body.get("error")) {
        (Some(Value::String(message)), _) => Some(message.clone()),
        (_, Some(Value::String(error))) => Some(error.clone()),
        (_, Some(Value::Object(error))) => error.get("message").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Only the delta-seconds form of `retry-after` is understood.
fn retry_after(response: &HttpResponse) -> Option<Duration> {
    response
        .header("retry-after")
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn snippet(body: &str) -> String {
    body.chars().take(SNIPPET_CHARS).collect()
}
