use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("http error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("rate limited by upstream")]
    RateLimited,
    #[error("unexpected http status: {0}")]
    UnexpectedStatus(u16),
    #[error("api error {code}: {message}")]
    ApiError { code: i64, message: String },
    #[error("invalid uid: {0}")]
    InvalidUid(String),
    #[error("http client is shut down")]
    ClientClosed,
}

impl StatusError {
    /// Whether the failure was an HTTP 429 from upstream.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, StatusError::RateLimited)
    }
}
