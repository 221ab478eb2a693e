//! Client configuration.
//!
//! Recognized options: `api_token` (required), `api_url`, `timeout`
//! (seconds), `visitor_id` and `api_version`. They can come from code, from
//! the `TCA_*` environment variables, or from a JSON document. Unknown keys
//! are an error in both of the latter. Retry behaviour is configured in code
//! only.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use ::config::{Config, Environment};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};

use crate::error::ApiError;
use crate::transport::RetryPolicy;

pub const DEFAULT_API_URL: &str = "https://api.thecompaniesapi.com";
pub const DEFAULT_API_VERSION: &str = "v2";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Environment variables are `TCA_` followed by the option name in upper
/// case, e.g. `TCA_API_URL`.
pub const ENV_PREFIX: &str = "TCA";
pub const ENV_API_TOKEN: &str = "TCA_API_TOKEN";

#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub api_token: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout", deserialize_with = "seconds")]
    pub timeout: Duration,
    #[serde(default)]
    pub visitor_id: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(skip)]
    pub retry: RetryPolicy,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// Whole seconds, as a JSON number or as the text of an environment variable.
fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    struct Seconds;

    impl Visitor<'_> for Seconds {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a whole number of seconds")
        }

        fn visit_u64<E: de::Error>(self, secs: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(secs))
        }

        fn visit_i64<E: de::Error>(self, secs: i64) -> Result<Duration, E> {
            u64::try_from(secs)
                .map(Duration::from_secs)
                .map_err(|_| E::invalid_value(de::Unexpected::Signed(secs), &self))
        }

        fn visit_str<E: de::Error>(self, text: &str) -> Result<Duration, E> {
            text.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| E::invalid_value(de::Unexpected::Str(text), &self))
        }
    }

    deserializer.deserialize_any(Seconds)
}

impl ClientConfig {
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            api_token: api_token.into(),
            api_url: default_api_url(),
            timeout: DEFAULT_TIMEOUT,
            visitor_id: None,
            api_version: default_api_version(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_visitor_id(mut self, visitor_id: impl Into<String>) -> Self {
        self.visitor_id = Some(visitor_id.into());
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Read the `TCA_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ApiError> {
        Self::from_vars(std::env::vars())
    }

    /// Same as `from_env`, over an explicit set of variables. Variables
    /// without the `TCA_` prefix are ignored; a prefixed variable that
    /// names no option is an error.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ApiError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        if vars.get(ENV_API_TOKEN).map_or(true, |token| token.is_empty()) {
            return Err(ApiError::Config(format!("{ENV_API_TOKEN} is not set")));
        }

        let environment = Environment::with_prefix(ENV_PREFIX)
            .ignore_empty(true)
            .source(Some(vars));
        let config: ClientConfig = Config::builder()
            .add_source(environment)
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| ApiError::Config(format!("invalid {ENV_PREFIX}_* environment: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self, ApiError> {
        let config: ClientConfig =
            serde_json::from_str(raw).map_err(|e| ApiError::Config(format!("invalid client configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that do not need the network. The base URL itself is
    /// validated when the request builder is created.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.api_token.trim().is_empty() {
            return Err(ApiError::Config("api_token is required".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(ApiError::Config("timeout must be greater than zero".to_string()));
        }
        if matches!(&self.visitor_id, Some(id) if id.trim().is_empty()) {
            return Err(ApiError::Config("visitor_id must not be blank".to_string()));
        }
        Ok(())
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_token", &mask_token(&self.api_token))
            .field("api_url", &self.api_url)
            .field("timeout", &self.timeout)
            .field("visitor_id", &self.visitor_id)
            .field("api_version", &self.api_version)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Keep only the edges of a secret for diagnostics.
fn mask_token(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_production_api() {
        let config = ClientConfig::new("test-token");
        assert_eq!(config.api_url, "https://api.thecompaniesapi.com");
        assert_eq!(config.api_version, "v2");
        assert_eq!(config.timeout, Duration::from_secs(300));
        assert!(config.visitor_id.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn blank_token_is_rejected() {
        let err = ClientConfig::new("  ").validate().unwrap_err();
        assert!(matches!(err, ApiError::Config(ref m) if m == "api_token is required"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = ClientConfig::new("t").with_timeout(Duration::ZERO).validate().unwrap_err();
        assert!(matches!(err, ApiError::Config(_)));
    }

    #[test]
    fn env_vars_are_read() {
        let config = ClientConfig::from_vars([
            ("TCA_API_TOKEN", "env-token"),
            ("TCA_API_URL", "https://custom.api.com"),
            ("TCA_VISITOR_ID", "visitor-123"),
            ("TCA_TIMEOUT", "120"),
            ("HOME", "/root"),
        ])
        .unwrap();
        assert_eq!(config.api_token, "env-token");
        assert_eq!(config.api_url, "https://custom.api.com");
        assert_eq!(config.visitor_id.as_deref(), Some("visitor-123"));
        assert_eq!(config.timeout, Duration::from_secs(120));
    }

    #[test]
    fn missing_env_token_is_a_config_error() {
        let err = ClientConfig::from_vars([("TCA_API_URL", "https://custom.api.com")]).unwrap_err();
        assert!(err.to_string().contains("TCA_API_TOKEN is not set"));
    }

    #[test]
    fn non_numeric_env_timeout_is_rejected() {
        let err = ClientConfig::from_vars([("TCA_API_TOKEN", "t"), ("TCA_TIMEOUT", "soon")]).unwrap_err();
        assert!(matches!(err, ApiError::Config(_)));
        assert!(err.to_string().contains("a whole number of seconds"), "{err}");
    }

    #[test]
    fn misspelled_env_option_is_rejected() {
        let err = ClientConfig::from_vars([("TCA_API_TOKEN", "t"), ("TCA_TIMOUT", "5")]).unwrap_err();
        assert!(matches!(err, ApiError::Config(_)));
        assert!(err.to_string().contains("timout"), "{err}");
    }

    #[test]
    fn empty_env_values_are_treated_as_unset() {
        let config = ClientConfig::from_vars([("TCA_API_TOKEN", "t"), ("TCA_VISITOR_ID", "")]).unwrap();
        assert!(config.visitor_id.is_none());
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn numeric_env_token_keeps_its_text() {
        let config = ClientConfig::from_vars([("TCA_API_TOKEN", "007")]).unwrap();
        assert_eq!(config.api_token, "007");
    }

    #[test]
    fn json_config_applies_defaults() {
        let config = ClientConfig::from_json(r#"{"api_token": "abc", "timeout": 30}"#).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn json_config_rejects_unknown_keys() {
        let err = ClientConfig::from_json(r#"{"api_token": "abc", "api_key": "typo"}"#).unwrap_err();
        assert!(err.to_string().contains("unknown field `api_key`"));
    }

    #[test]
    fn debug_output_masks_the_token() {
        let rendered = format!("{:?}", ClientConfig::new("sk_live_0123456789"));
        assert!(rendered.contains("sk_l...6789"));
        assert!(!rendered.contains("sk_live_0123456789"));
    }
}
