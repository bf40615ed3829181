use serde::Serialize;
use thiserror::Error;

/// Structural problems with the profile or run settings. Raised before any candidate is touched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("max_articles must be at least 1 (got {0})")]
    InvalidBudget(i64),

    #[error("relevance_threshold must be within [0, 1] (got {0})")]
    InvalidThreshold(f64),

    #[error("concurrency_limit must be at least 1")]
    InvalidConcurrency,

    #[error("max_age_hours must be between 1 and 87600 (got {0})")]
    InvalidMaxAge(i64),
}

/// Failure of a single language-model invocation.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CallError {
    #[error("request timed out")]
    Timeout,

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response: {0}")]
    InvalidResponse(String),

    #[error("cancelled")]
    Cancelled,
}

impl CallError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            CallError::Timeout | CallError::RateLimited(_) | CallError::Network(_) => true,
            CallError::Api { status, .. } => *status >= 500,
            CallError::InvalidResponse(_) | CallError::Cancelled => false,
        }
    }
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CallError::Timeout
        } else if err.is_decode() {
            CallError::InvalidResponse(err.to_string())
        } else {
            CallError::Network(err.to_string())
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum JudgeError {
    #[error("candidate cannot be judged: {0}")]
    InvalidCandidate(String),

    #[error("language model call failed: {0}")]
    Call(#[from] CallError),

    #[error("evaluation did not match schema: {0}")]
    Schema(String),

    #[error("cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SummarizerError {
    #[error("article has no full text to summarize")]
    MissingContent,

    #[error("language model call failed: {0}")]
    Call(#[from] CallError),

    #[error("summary could not be decomposed: {0}")]
    Malformed(String),

    #[error("cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error fetching {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("could not parse {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid candidate file: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Retry classification shared by the judge and the summarizer.
pub trait Retryable: Sized {
    fn is_retryable(&self) -> bool;
    fn is_rate_limit(&self) -> bool {
        false
    }
    fn cancelled() -> Self;
}

impl Retryable for JudgeError {
    fn is_retryable(&self) -> bool {
        match self {
            JudgeError::Call(e) => e.is_transient(),
            JudgeError::Schema(_) => true,
            JudgeError::InvalidCandidate(_) | JudgeError::Cancelled => false,
        }
    }

    fn is_rate_limit(&self) -> bool {
        matches!(self, JudgeError::Call(CallError::RateLimited(_)))
    }

    fn cancelled() -> Self {
        JudgeError::Cancelled
    }
}

impl Retryable for SummarizerError {
    fn is_retryable(&self) -> bool {
        match self {
            SummarizerError::Call(e) => e.is_transient(),
            SummarizerError::Malformed(_) => true,
            SummarizerError::MissingContent | SummarizerError::Cancelled => false,
        }
    }

    fn is_rate_limit(&self) -> bool {
        matches!(self, SummarizerError::Call(CallError::RateLimited(_)))
    }

    fn cancelled() -> Self {
        SummarizerError::Cancelled
    }
}
