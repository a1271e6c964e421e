//! Policy client errors

use thiserror::Error;

/// Errors that can occur when talking to a cluster's API server
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyClientError {
    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency conflict (stale resourceVersion) or already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// API server unreachable, timing out, throttling or failing internally
    #[error("API server unavailable: {0}")]
    Unavailable(String),

    /// Authentication or authorization rejected the request
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The request itself is malformed (bad object, schema violation)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// How the reconciler reacts to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// A valid observed state, not a failure
    NotFound,
    /// Retried with backoff
    Transient,
    /// Not retried until an external change re-triggers the key
    Fatal,
}

impl PolicyClientError {
    /// Classifies the error for retry purposes
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::Conflict(_) | Self::Unavailable(_) => ErrorClass::Transient,
            Self::Forbidden(_) | Self::InvalidRequest(_) => ErrorClass::Fatal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Maps an HTTP status code returned by the API server
    pub fn from_status(code: u16, message: String) -> Self {
        match code {
            404 | 410 => Self::NotFound(message),
            409 => Self::Conflict(message),
            401 | 403 => Self::Forbidden(message),
            400 | 405 | 406 | 413 | 415 | 422 => Self::InvalidRequest(message),
            // 429, 5xx and anything unexpected are worth retrying
            _ => Self::Unavailable(message),
        }
    }
}

impl From<kube::Error> for PolicyClientError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => Self::from_status(resp.code, resp.message.clone()),
            kube::Error::SerdeError(e) => Self::InvalidRequest(e.to_string()),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_classification() {
        let cases = [
            (404, ErrorClass::NotFound),
            (409, ErrorClass::Transient),
            (429, ErrorClass::Transient),
            (500, ErrorClass::Transient),
            (503, ErrorClass::Transient),
            (504, ErrorClass::Transient),
            (401, ErrorClass::Fatal),
            (403, ErrorClass::Fatal),
            (400, ErrorClass::Fatal),
            (422, ErrorClass::Fatal),
        ];
        for (code, expected) in cases {
            assert_eq!(
                PolicyClientError::from_status(code, String::new()).class(),
                expected,
                "status {code}"
            );
        }
    }

    #[test]
    fn test_conflict_is_distinguishable() {
        let err = PolicyClientError::from_status(409, "the object has been modified".to_string());
        assert!(err.is_conflict());
        assert!(!err.is_not_found());
    }
}
