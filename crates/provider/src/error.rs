#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {status} - {body}")]
    HttpError { status: u16, body: String },

    #[error("SSE stream error: {0}")]
    StreamError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Rate limited. Retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Authentication failed: {0}")]
    AuthExpired(String),

    #[error("Context window exceeded: {0}")]
    ContextOverflow(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. } | ProviderError::StreamError(_) => true,
            ProviderError::HttpError { status, .. } => *status == 429 || *status >= 500,
            ProviderError::AuthExpired(_)
            | ProviderError::DeserializationError(_)
            | ProviderError::ContextOverflow(_) => false,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. } => true,
            ProviderError::HttpError { status, .. } => *status == 429,
            _ => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        match self {
            ProviderError::AuthExpired(_) => true,
            ProviderError::HttpError { status, .. } => *status == 401 || *status == 403,
            _ => false,
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_classification() {
        let unauthorized = ProviderError::HttpError {
            status: 401,
            body: "expired".into(),
        };
        assert!(unauthorized.is_auth());
        assert!(!unauthorized.is_retryable());

        let throttled = ProviderError::HttpError {
            status: 429,
            body: "slow down".into(),
        };
        assert!(throttled.is_rate_limit());
        assert!(throttled.is_retryable());

        let server = ProviderError::HttpError {
            status: 503,
            body: "overloaded".into(),
        };
        assert!(server.is_retryable());
        assert!(!server.is_auth());
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let err = ProviderError::RateLimited { retry_after_ms: 1500 };
        assert_eq!(err.retry_after_ms(), Some(1500));
        assert!(err.is_rate_limit());
    }
}
