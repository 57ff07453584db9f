//! Model call failures and how the runtime should react to them

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
    /// Server-requested wait before the next attempt
    pub retry_after: Option<Duration>,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    #[must_use]
    pub fn with_retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    /// Map a non-success gateway status to an error kind
    pub fn from_status(status: u16, message: &str) -> Self {
        match status {
            401 | 403 => Self::auth(format!("Authentication failed: {message}")),
            429 => Self::rate_limit(format!("Rate limit exceeded: {message}")),
            400 | 404 | 422 => Self::invalid_request(format!("Invalid request: {message}")),
            500..=599 => Self::server_error(format!("Server error: {message}")),
            _ => Self::new(LlmErrorKind::Unknown, format!("HTTP {status}: {message}")),
        }
    }

    /// Failures before any status line arrived
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::network(format!("Request timeout: {err}"))
        } else if err.is_connect() {
            Self::network(format!("Connection failed: {err}"))
        } else {
            Self::new(LlmErrorKind::Unknown, format!("Request failed: {err}"))
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Network, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::RateLimit, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::ServerError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Auth, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::InvalidRequest, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::MalformedResponse, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Connection trouble or a transport timeout
    Network,
    /// 429
    RateLimit,
    /// 5xx
    ServerError,
    /// 401 and 403
    Auth,
    /// 400, 404, 422
    InvalidRequest,
    /// Body did not match the expected shape
    MalformedResponse,
    Unknown,
}

impl LlmErrorKind {
    /// Transient failures worth another attempt
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::RateLimit | Self::ServerError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(LlmError::from_status(429, "x").kind, LlmErrorKind::RateLimit);
        assert_eq!(LlmError::from_status(502, "x").kind, LlmErrorKind::ServerError);
        assert_eq!(LlmError::from_status(403, "x").kind, LlmErrorKind::Auth);
        assert_eq!(LlmError::from_status(422, "x").kind, LlmErrorKind::InvalidRequest);
        assert_eq!(LlmError::from_status(302, "x").kind, LlmErrorKind::Unknown);
        assert_eq!(
            LlmError::from_status(401, "bad key").to_string(),
            "Authentication failed: bad key"
        );
    }

    #[test]
    fn test_only_transient_kinds_retry() {
        assert!(LlmError::from_status(429, "x").is_retryable());
        assert!(LlmError::from_status(503, "x").is_retryable());
        assert!(LlmError::network("reset").is_retryable());
        assert!(!LlmError::from_status(401, "x").is_retryable());
        assert!(!LlmError::from_status(400, "x").is_retryable());
        assert!(!LlmError::malformed("x").is_retryable());
    }

    #[test]
    fn test_retry_after_kept() {
        let err = LlmError::rate_limit("slow down").with_retry_after(Duration::from_secs(2));
        assert_eq!(err.retry_after, Some(Duration::from_secs(2)));
        assert_eq!(err.to_string(), "slow down");
    }
}
