use thiserror::Error;

/// Failures talking to the Flag Definition or Targeting services.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    /// Timeout, connection failure or a server-side error. Retried once.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("flag not found: {0}")]
    NotFound(String),

    /// The targeting service rejected the evaluation context.
    #[error("invalid context: {0}")]
    InvalidContext(String),

    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
}

impl UpstreamError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, UpstreamError::Unavailable(_))
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            UpstreamError::InvalidResponse(err.to_string())
        } else {
            UpstreamError::Unavailable(err.to_string())
        }
    }
}

/// Errors `evaluate` hands back to the caller. Everything else degrades to a
/// fallback decision.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvaluationError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid context: {0}")]
    InvalidContext(String),
}
