//! Error types for the quote collector

use thiserror::Error;

/// Result type alias for collector operations
pub type Result<T> = std::result::Result<T, CollectorError>;

/// Sub-kinds of backend adapter failure.
///
/// The breaker does not distinguish between these (any error counts as a
/// failure); they exist so call sites can decide whether a failure is
/// retryable inside the adapter or fatal for the backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// Authentication failed (401/403). Not retried.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Remote rate-limited the request (429). Retried with backoff.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Remote returned a 5xx. Retried with backoff.
    #[error("server error: {0}")]
    Server(String),

    /// Transport-level failure (connection reset, DNS, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// Response was received but could not be parsed into a quote.
    #[error("parse error: {0}")]
    Parse(String),
}

impl AdapterError {
    /// Whether this error reached the remote (vs. failing before dispatch).
    ///
    /// Used by the cost tracker's charge-on-definite-outcome rule: only
    /// errors that indicate the remote was actually reached are charged.
    pub fn reached_remote(&self) -> bool {
        !matches!(self, AdapterError::Transport(_))
    }
}

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum CollectorError {
    /// The paid path would be needed but the cost tracker denied it.
    #[error("budget exhausted: remaining budget below unit cost")]
    BudgetExhausted,

    /// The named backend's breaker is currently tripped.
    #[error("circuit open for backend: {backend}")]
    CircuitOpen { backend: String },

    /// A backend adapter call failed.
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// Cache storage failure. Never propagated out of the Cache module in
    /// normal operation; retained here for diagnostics and tests.
    #[error("cache error: {0}")]
    Cache(#[from] sqlx::Error),

    /// Missing or invalid required configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization failure, e.g. in cost tracker persistence.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O failure, e.g. atomic rename of the cost tracker state file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with attached context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        source: Box<CollectorError>,
    },
}

impl CollectorError {
    pub fn config(msg: impl Into<String>) -> Self {
        CollectorError::Config(msg.into())
    }

    pub fn context(self, context: impl Into<String>) -> Self {
        CollectorError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to `Result`s, similar in spirit to
/// the `.context()` combinator from generic error-wrapping crates, but
/// preserving the typed `CollectorError` instead of erasing to a trait object.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }
}
