use thiserror::Error;

/// Application-wide error types for Argus.
///
/// Every failure mode a scrape can hit is a variant here; the public
/// boundary (router/aggregator) converts these into structured result
/// objects instead of propagating them to callers.
#[derive(Error, Debug)]
pub enum ScrapeError {
    /// Source is missing the configuration its tier requires.
    /// Fatal for that source only, never for the batch.
    #[error("Configuration error for source '{source_id}': {message}")]
    Config { source_id: String, message: String },

    /// HTTP request failed with a non-success status or protocol error.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    Network(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The source served a CAPTCHA or challenge page instead of results.
    /// Never retried blindly; the router escalates one tier instead.
    #[error("Blocked by anti-bot protection: {0}")]
    Blocked(String),

    /// The source rate-limited us (HTTP 429).
    #[error("Rate limited by source")]
    RateLimited,

    /// Short-circuited before any network call was made.
    #[error("Circuit open for '{source_id}', retry after {retry_after_ms} ms")]
    CircuitOpen {
        source_id: String,
        retry_after_ms: u64,
    },

    /// Response body could not be parsed into entities.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Headless browser automation failed.
    #[error("Browser error: {0}")]
    Browser(String),

    /// Cache tier operation failed.
    #[error("Cache error: {0}")]
    Cache(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScrapeError {
    /// Returns true if this error is transient and worth retrying locally
    /// (inside an engine, with fixed backoff).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScrapeError::Network(_) | ScrapeError::Timeout(_))
    }

    /// Returns true if this is a blocking signal: the source detected
    /// automation and is refusing to serve real content. Triggers tier
    /// escalation rather than a blind retry.
    pub fn is_blocking(&self) -> bool {
        matches!(self, ScrapeError::Blocked(_) | ScrapeError::RateLimited)
    }

    /// Returns true if this error should be recorded against the source's
    /// circuit breaker.
    ///
    /// Circuit-open rejections are counted separately, and a bad config is
    /// not evidence that the source itself is unhealthy. Everything else is
    /// treated as a failure (fail-safe default for unknown error shapes).
    pub fn should_trip_circuit(&self) -> bool {
        !matches!(
            self,
            ScrapeError::CircuitOpen { .. } | ScrapeError::Config { .. } | ScrapeError::Cache(_)
        )
    }
}
