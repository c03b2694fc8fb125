use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider unavailable (status {status})")]
    Unavailable { status: u16 },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("empty response from {provider}")]
    EmptyResponse { provider: String },

    #[error("embedding request rejected by {provider}: {message}")]
    Rejected { provider: String, message: String },

    #[error("{0}")]
    Other(String),
}

impl LlmError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| {
                        s.is_server_error() || s == reqwest::StatusCode::TOO_MANY_REQUESTS
                    })
            }
            Self::RateLimited { .. } | Self::Unavailable { .. } | Self::Timeout(_) => true,
            Self::Json(_) | Self::EmptyResponse { .. } | Self::Rejected { .. } | Self::Other(_) => {
                false
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
