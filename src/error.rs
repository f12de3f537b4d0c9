//! Error types for the tether client

use std::time::Duration;
use thiserror::Error;

/// Result type alias for tether operations
pub type TetherResult<T> = Result<T, TetherError>;

/// Failure class consulted by the circuit breaker and retry policy.
///
/// Retry and circuit decisions look only at the class of an error, never at
/// its message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Service name unresolvable; surfaced immediately, never retried
    NotFound,
    /// Breaker is suppressing calls; surfaced immediately so callers can
    /// apply their own fallback
    CircuitOpen,
    /// Network-level failure (connect/reset/timeout, 5xx); retryable
    Transient,
    /// The request itself was invalid or the remote logic rejected it
    /// (4xx, decode failure); never retried
    Semantic,
    /// Caller-initiated cancellation, distinct from a deadline timeout
    Cancelled,
}

/// Main error type for tether operations
#[derive(Error, Debug, Clone)]
pub enum TetherError {
    /// Service name is not registered
    #[error("service '{service}' is not registered")]
    NotFound { service: String },

    /// Circuit breaker is rejecting calls to the service
    #[error("circuit open for service '{service}'")]
    CircuitOpen { service: String },

    /// Connection could not be established
    #[error("connect to '{service}' failed: {message}")]
    Connect { service: String, message: String },

    /// Connection-level failure after the connection was established
    #[error("transport error calling '{service}': {message}")]
    Transport { service: String, message: String },

    /// Non-success HTTP status from the remote service
    #[error("service '{service}' returned status {code}: {message}")]
    Status {
        service: String,
        code: u16,
        message: String,
    },

    /// Request deadline exceeded
    #[error("request timed out after {after:?}")]
    Timeout { after: Duration },

    /// Response or payload could not be decoded
    #[error("decode error: {message}")]
    Decode { message: String },

    /// Request could not be constructed (bad URL, invalid header value)
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// Operation was cancelled by the caller or by client shutdown
    #[error("operation cancelled")]
    Cancelled,

    /// Connection pool has been shut down; retryable, since a pool is
    /// replaced in place when a service's endpoint changes
    #[error("connection pool for '{service}' is closed")]
    PoolClosed { service: String },

    /// All retry attempts were exhausted
    #[error("call to '{service}' failed after {attempts} attempts: {last}")]
    Exhausted {
        service: String,
        attempts: u32,
        last: Box<TetherError>,
    },

    /// Configuration error
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Generic error with context
    #[error("error: {message}")]
    Other { message: String },
}

impl TetherError {
    /// Create a NotFound error
    pub fn not_found(service: impl Into<String>) -> Self {
        Self::NotFound {
            service: service.into(),
        }
    }

    /// Create a CircuitOpen error
    pub fn circuit_open(service: impl Into<String>) -> Self {
        Self::CircuitOpen {
            service: service.into(),
        }
    }

    /// Create a Connect error
    pub fn connect(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connect {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a Transport error
    pub fn transport(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a Status error from an HTTP status code
    pub fn status(service: impl Into<String>, code: u16, message: impl Into<String>) -> Self {
        Self::Status {
            service: service.into(),
            code,
            message: message.into(),
        }
    }

    /// Create a Timeout error
    pub const fn timeout(after: Duration) -> Self {
        Self::Timeout { after }
    }

    /// Create a Decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create an InvalidRequest error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a PoolClosed error
    pub fn pool_closed(service: impl Into<String>) -> Self {
        Self::PoolClosed {
            service: service.into(),
        }
    }

    /// Create an Exhausted error wrapping the last attempt's failure
    pub fn exhausted(service: impl Into<String>, attempts: u32, last: TetherError) -> Self {
        Self::Exhausted {
            service: service.into(),
            attempts,
            last: Box::new(last),
        }
    }

    /// Create a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Classify this error for retry and circuit decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::CircuitOpen { .. } => ErrorClass::CircuitOpen,
            Self::Connect { .. } | Self::Transport { .. } | Self::Timeout { .. } => {
                ErrorClass::Transient
            }
            Self::Status { code, .. } => {
                if *code >= 500 {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Semantic
                }
            }
            Self::Decode { .. }
            | Self::InvalidRequest { .. }
            | Self::Config { .. }
            | Self::Other { .. } => ErrorClass::Semantic,
            Self::Cancelled => ErrorClass::Cancelled,
            // A closed pool is usually a pool being replaced after an
            // endpoint change; the retried attempt lands on the new pool.
            Self::PoolClosed { .. } => ErrorClass::Transient,
            Self::Exhausted { .. } => ErrorClass::Transient,
        }
    }

    /// Whether the retry policy may repeat the attempt
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Map a reqwest error observed while talking to `service` under a
    /// `deadline`
    pub fn from_reqwest(service: &str, err: reqwest::Error, deadline: Duration) -> Self {
        if err.is_connect() {
            Self::connect(service, err.to_string())
        } else if err.is_timeout() {
            Self::Timeout { after: deadline }
        } else if err.is_decode() {
            Self::decode(err.to_string())
        } else {
            Self::transport(service, err.to_string())
        }
    }
}

impl From<serde_json::Error> for TetherError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode {
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for TetherError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_table() {
        assert_eq!(TetherError::not_found("x").class(), ErrorClass::NotFound);
        assert_eq!(
            TetherError::circuit_open("x").class(),
            ErrorClass::CircuitOpen
        );
        assert_eq!(
            TetherError::connect("x", "refused").class(),
            ErrorClass::Transient
        );
        assert_eq!(
            TetherError::transport("x", "reset").class(),
            ErrorClass::Transient
        );
        assert_eq!(
            TetherError::timeout(Duration::from_secs(5)).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            TetherError::status("x", 503, "unavailable").class(),
            ErrorClass::Transient
        );
        assert_eq!(
            TetherError::status("x", 404, "no such tool").class(),
            ErrorClass::Semantic
        );
        assert_eq!(
            TetherError::status("x", 400, "bad args").class(),
            ErrorClass::Semantic
        );
        assert_eq!(TetherError::decode("bad json").class(), ErrorClass::Semantic);
        assert_eq!(TetherError::Cancelled.class(), ErrorClass::Cancelled);
        // A closed pool is retryable; Cancelled stays caller-only.
        assert_eq!(
            TetherError::pool_closed("x").class(),
            ErrorClass::Transient
        );
    }

    #[test]
    fn timeout_keeps_subsecond_precision() {
        let err = TetherError::timeout(Duration::from_millis(100));
        assert!(err.to_string().contains("100ms"), "got: {err}");
    }

    #[test]
    fn exhausted_wraps_last_error() {
        let last = TetherError::connect("memory", "refused");
        let err = TetherError::exhausted("memory", 4, last);
        assert!(err.is_transient());
        assert!(err.to_string().contains("after 4 attempts"));
    }
}
