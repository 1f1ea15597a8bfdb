use thiserror::Error;

/// Failures of the external HTTP services (places lookup, language model).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Non-OK status reported inside a 200 response body.
    #[error("API status {0}")]
    Api(String),

    #[error("Unexpected response: {0}")]
    Parse(String),
}

impl ApiError {
    /// Rate limits and transient server faults are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Http(e) => e.is_timeout() || e.is_connect(),
            ApiError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            ApiError::Api(s) => s == "OVER_QUERY_LIMIT" || s == "UNKNOWN_ERROR",
            ApiError::Parse(_) => false,
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
