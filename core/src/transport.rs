//! Executes `HttpRequest` values over the network.
//!
//! # Design
//! `Transport` is the only seam where I/O happens; the rest of the crate
//! hands it finished descriptors and gets plain `HttpResponse` data back.
//! Tests substitute a recording stub. `UreqTransport` is the production
//! implementation on top of a pooled blocking `ureq::Agent`.
//!
//! Retries are limited to GET. Writes are sent exactly once, whatever the
//! outcome, so a flaky connection can never duplicate a side effect.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};
use ureq::http::Response;
use ureq::typestate::WithBody;
use ureq::Body;

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub const USER_AGENT: &str = concat!("companies-core/", env!("CARGO_PKG_VERSION"));
pub const VISITOR_ID_HEADER: &str = "tca-visitor-id";

/// Statuses worth another attempt for a GET.
const RETRY_STATUSES: [u16; 4] = [500, 502, 503, 504];

pub trait Transport: Send + Sync {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).execute(request)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).execute(request)
    }
}

/// A request that produced no response.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("timed out after {}ms", .timeout.as_millis())]
    Timeout { timeout: Duration },

    #[error("failed after {attempts} attempt(s): {source}")]
    Network {
        attempts: u32,
        #[source]
        source: BoxError,
    },
}

impl TransportError {
    pub fn into_api_error(self, operation: &str) -> ApiError {
        match self {
            TransportError::Timeout { timeout } => ApiError::Timeout {
                operation: operation.to_string(),
                timeout,
            },
            TransportError::Network { attempts, source } => ApiError::Network {
                operation: operation.to_string(),
                attempts,
                source,
            },
        }
    }
}

/// Outcome of a single try, before the retry decision.
#[derive(Debug)]
pub enum AttemptError {
    Timeout(Duration),
    /// Connection-level failure that may clear up on its own.
    Transient(BoxError),
    Fatal(BoxError),
}

/// Bounded exponential backoff for idempotent requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Drive `send` until it yields a final outcome.
    pub fn run<F>(&self, method: HttpMethod, mut send: F) -> Result<HttpResponse, TransportError>
    where
        F: FnMut() -> Result<HttpResponse, AttemptError>,
    {
        let max_attempts = if method.is_retry_safe() {
            self.max_retries.saturating_add(1)
        } else {
            1
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let last = attempt >= max_attempts;
            match send() {
                Ok(response) if !last && RETRY_STATUSES.contains(&response.status) => {
                    warn!(status = response.status, attempt, "server error, retrying");
                }
                Ok(response) => return Ok(response),
                Err(AttemptError::Timeout(timeout)) => return Err(TransportError::Timeout { timeout }),
                Err(AttemptError::Transient(source)) if !last => {
                    warn!(error = %source, attempt, "transient failure, retrying");
                }
                Err(AttemptError::Transient(source)) | Err(AttemptError::Fatal(source)) => {
                    return Err(TransportError::Network {
                        attempts: attempt,
                        source,
                    })
                }
            }
            thread::sleep(self.delay_for(attempt));
        }
    }
}

/// Headers every request carries, in send order.
pub fn default_headers(config: &ClientConfig) -> Vec<(String, String)> {
    let mut headers = vec![
        ("authorization".to_string(), format!("Basic {}", config.api_token)),
        ("accept".to_string(), "application/json".to_string()),
        ("user-agent".to_string(), USER_AGENT.to_string()),
    ];
    if let Some(visitor_id) = &config.visitor_id {
        headers.push((VISITOR_ID_HEADER.to_string(), visitor_id.clone()));
    }
    headers
}

/// Blocking transport backed by a pooled `ureq::Agent`. Cheap to share
/// between threads.
#[derive(Debug)]
pub struct UreqTransport {
    agent: ureq::Agent,
    default_headers: Vec<(String, String)>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl UreqTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        config.validate()?;
        // Non-2xx statuses are data for the normalizer, not transport errors.
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(config.timeout))
            .build()
            .new_agent();
        Ok(Self {
            agent,
            default_headers: default_headers(config),
            timeout: config.timeout,
            retry: config.retry.clone(),
        })
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn send_once(&self, request: &HttpRequest) -> Result<HttpResponse, AttemptError> {
        let url = request.url.as_str();
        let body = request.body.as_deref();
        let result = match request.method {
            HttpMethod::Get => self.with_headers(self.agent.get(url), request).call(),
            HttpMethod::Delete => self.with_headers(self.agent.delete(url), request).call(),
            HttpMethod::Post => send_body(self.with_headers(self.agent.post(url), request), body),
            HttpMethod::Put => send_body(self.with_headers(self.agent.put(url), request), body),
            HttpMethod::Patch => send_body(self.with_headers(self.agent.patch(url), request), body),
        };

        // The body is read to the end here so the connection goes back to
        // the pool (or is dropped) before this function returns.
        let mut response = result.map_err(|e| self.classify(e))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| self.classify(e))?;

        Ok(HttpResponse { status, headers, body })
    }

    fn with_headers<B>(&self, mut builder: ureq::RequestBuilder<B>, request: &HttpRequest) -> ureq::RequestBuilder<B> {
        for (name, value) in self.default_headers.iter().chain(&request.headers) {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }

    fn classify(&self, err: ureq::Error) -> AttemptError {
        match err {
            ureq::Error::Timeout(_) => AttemptError::Timeout(self.timeout),
            ureq::Error::Io(_) | ureq::Error::ConnectionFailed => AttemptError::Transient(Box::new(err)),
            other => AttemptError::Fatal(Box::new(other)),
        }
    }
}

fn send_body(builder: ureq::RequestBuilder<WithBody>, body: Option<&str>) -> Result<Response<Body>, ureq::Error> {
    match body {
        Some(body) => builder.send(body.as_bytes()),
        None => builder.send_empty(),
    }
}

impl Transport for UreqTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        debug!(method = %request.method, url = %request.url, "sending request");
        let response = self.retry.run(request.method, || self.send_once(request))?;
        debug!(status = response.status, bytes = response.body.len(), "received response");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn response(status: u16) -> HttpResponse {
        HttpResponse {
            status,
            headers: Vec::new(),
            body: "{}".to_string(),
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for(10), Duration::from_secs(8));
    }

    #[test]
    fn get_is_retried_on_server_errors() {
        let calls = Cell::new(0);
        let result = fast_policy().run(HttpMethod::Get, || {
            calls.set(calls.get() + 1);
            Ok(response(if calls.get() < 3 { 503 } else { 200 }))
        });
        assert_eq!(result.unwrap().status, 200);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn exhausted_server_errors_return_the_last_response() {
        let calls = Cell::new(0);
        let result = fast_policy().run(HttpMethod::Get, || {
            calls.set(calls.get() + 1);
            Ok(response(502))
        });
        assert_eq!(result.unwrap().status, 502);
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn writes_are_never_retried() {
        for method in [HttpMethod::Post, HttpMethod::Put, HttpMethod::Patch, HttpMethod::Delete] {
            let calls = Cell::new(0);
            let result = fast_policy().run(method, || {
                calls.set(calls.get() + 1);
                Err(AttemptError::Transient("connection reset".into()))
            });
            assert!(matches!(result, Err(TransportError::Network { attempts: 1, .. })));
            assert_eq!(calls.get(), 1, "{method} was retried");
        }
    }

    #[test]
    fn transient_failures_collapse_into_one_network_error() {
        let calls = Cell::new(0);
        let result = fast_policy().run(HttpMethod::Get, || {
            calls.set(calls.get() + 1);
            Err(AttemptError::Transient(format!("reset #{}", calls.get()).into()))
        });
        match result {
            Err(TransportError::Network { attempts, source }) => {
                assert_eq!(attempts, 4);
                assert_eq!(source.to_string(), "reset #4");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn timeouts_are_not_retried() {
        let calls = Cell::new(0);
        let result = fast_policy().run(HttpMethod::Get, || {
            calls.set(calls.get() + 1);
            Err(AttemptError::Timeout(Duration::from_secs(1)))
        });
        assert!(matches!(result, Err(TransportError::Timeout { .. })));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn fatal_failures_stop_immediately() {
        let calls = Cell::new(0);
        let result = fast_policy().run(HttpMethod::Get, || {
            calls.set(calls.get() + 1);
            Err(AttemptError::Fatal("bad uri".into()))
        });
        assert!(matches!(result, Err(TransportError::Network { attempts: 1, .. })));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn client_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result = fast_policy().run(HttpMethod::Get, || {
            calls.set(calls.get() + 1);
            Ok(response(429))
        });
        assert_eq!(result.unwrap().status, 429);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn default_headers_carry_token_and_visitor() {
        let config = ClientConfig::new("test-token").with_visitor_id("visitor-123");
        let headers = default_headers(&config);
        assert!(headers.contains(&("authorization".to_string(), "Basic test-token".to_string())));
        assert!(headers.contains(&("accept".to_string(), "application/json".to_string())));
        assert!(headers.contains(&(VISITOR_ID_HEADER.to_string(), "visitor-123".to_string())));
        assert!(headers.iter().any(|(k, v)| k == "user-agent" && v.starts_with("companies-core/")));
    }

    #[test]
    fn visitor_header_is_absent_by_default() {
        let headers = default_headers(&ClientConfig::new("test-token"));
        assert!(headers.iter().all(|(name, _)| name != VISITOR_ID_HEADER));
    }

    #[test]
    fn transport_errors_gain_the_operation() {
        let err = TransportError::Timeout {
            timeout: Duration::from_millis(250),
        }
        .into_api_error("fetchCompany");
        assert!(matches!(err, ApiError::Timeout { ref operation, .. } if operation == "fetchCompany"));
        assert_eq!(err.to_string(), "fetchCompany: timed out after 250ms");
    }
}
