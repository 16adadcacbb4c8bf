//! Proxy Error Types
//!
//! Structured errors for fetch and cache operations.
//! Each variant maps to a short kind string reported to socket clients.

/// Errors raised by cache and network operations
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Bad response status ({0}) for {1}")]
    BadStatus(u16, String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid worker state: {0}")]
    InvalidState(String),

    #[error("Cache storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Short machine-readable kind for protocol responses
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Network(_) => "network",
            ProxyError::Timeout => "timeout",
            ProxyError::BadStatus(_, _) => "badStatus",
            ProxyError::InvalidUrl(_) => "invalidUrl",
            ProxyError::InvalidRequest(_) => "invalidRequest",
            ProxyError::InvalidState(_) => "invalidState",
            ProxyError::Storage(_) => "storage",
            ProxyError::Io(_) => "io",
        }
    }

    /// Classify a reqwest transport failure
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProxyError::Timeout
        } else if err.is_builder() {
            ProxyError::InvalidRequest(err.to_string())
        } else {
            ProxyError::Network(err.to_string())
        }
    }
}

impl From<url::ParseError> for ProxyError {
    fn from(err: url::ParseError) -> Self {
        ProxyError::InvalidUrl(err.to_string())
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        ProxyError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(ProxyError::Timeout.kind(), "timeout");
        assert_eq!(ProxyError::BadStatus(404, "/x".into()).kind(), "badStatus");
        assert_eq!(ProxyError::InvalidRequest("POST".into()).kind(), "invalidRequest");
    }

    #[test]
    fn test_url_parse_error_maps_to_invalid_url() {
        let err: ProxyError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, ProxyError::InvalidUrl(_)));
        assert!(err.to_string().starts_with("Invalid URL"));
    }
}
