//! Error taxonomy for a pipeline run.
//!
//! [`IngestError`] covers everything that can stop a request or a run. The
//! retry decorator in [`crate::api`] asks each error whether it is worth
//! another attempt via [`IngestError::is_retryable`]; authentication and
//! malformed-request failures never are.
//!
//! Per-record problems are not run failures and live in
//! [`crate::normalize::NormalizeError`] instead.

use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    /// 401/403, or an API-level "invalid key" answer.
    #[error("authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },

    /// 429, or a provider rate-limit code in a 200 body.
    #[error("rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The provider answered but reported `status != "success"`.
    #[error("API error: {0}")]
    Api(String),

    /// Model output was cut off before the JSON closed.
    #[error("model output truncated: {0}")]
    Truncated(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// Snapshot could not be read or replaced. The previous file is left as it was.
    #[error("persistence error at {path}: {message}")]
    Persist { path: String, message: String },
}

pub type Result<T> = std::result::Result<T, IngestError>;

impl IngestError {
    /// Classify a non-success HTTP status into the taxonomy.
    pub fn from_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> Self {
        let message = if body.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("no response body")
                .to_string()
        } else {
            body.trim().to_string()
        };
        match status.as_u16() {
            401 | 403 => IngestError::Auth {
                status: status.as_u16(),
                message,
            },
            429 => IngestError::RateLimited {
                retry_after,
                message,
            },
            code => IngestError::Status {
                status: code,
                message,
            },
        }
    }

    /// Timeouts, connection failures, 5xx and 429 are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestError::RateLimited { .. } => true,
            IngestError::Status { status, .. } => *status >= 500,
            IngestError::Transport(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            _ => false,
        }
    }

    /// Provider-requested delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            IngestError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Parse a `Retry-After` header value given in whole seconds.
///
/// The HTTP-date form is not used by the providers this tool talks to and
/// yields `None`, which falls back to exponential backoff.
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value
        .map(str::trim)
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_statuses_are_fatal() {
        for code in [401u16, 403] {
            let err = IngestError::from_status(StatusCode::from_u16(code).unwrap(), None, "bad key");
            assert!(matches!(err, IngestError::Auth { .. }));
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_rate_limit_is_retryable_with_delay() {
        let err = IngestError::from_status(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(3)),
            "",
        );
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert!(err.to_string().contains("Too Many Requests"));
    }

    #[test]
    fn test_server_errors_retry_client_errors_do_not() {
        let e500 = IngestError::from_status(StatusCode::BAD_GATEWAY, None, "upstream");
        let e422 = IngestError::from_status(StatusCode::UNPROCESSABLE_ENTITY, None, "bad q");
        assert!(e500.is_retryable());
        assert!(!e422.is_retryable());
    }

    #[test]
    fn test_api_and_persist_errors_are_fatal() {
        assert!(!IngestError::Api("nope".into()).is_retryable());
        let p = IngestError::Persist {
            path: "x.json".into(),
            message: "disk full".into(),
        };
        assert!(!p.is_retryable());
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(Some(" 7 ")), Some(Duration::from_secs(7)));
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT")), None);
        assert_eq!(parse_retry_after(None), None);
    }
}
