use thiserror::Error;

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Debug, Error)]
pub enum SearchError {
    /// Fatal at startup: weights that do not sum to one, out-of-range
    /// parameters, stage limits in the wrong order.
    #[error("Configuration invalid: {0}")]
    ConfigurationInvalid(String),

    /// Embedding provider or retriever unreachable. Aborts the request;
    /// there is no fallback for an empty candidate pool.
    #[error("Retrieval failed: {0}")]
    RetrievalFailed(String),

    /// Neural reranker unreachable or returned malformed output. Recovered
    /// locally by falling back to the composite ordering.
    #[error("Rerank failed: {0}")]
    RerankFailed(String),

    /// Statistics snapshot unavailable; affected items are scored as cold.
    #[error("Statistics read failed: {0}")]
    StatisticsReadFailed(String),

    /// Feedback write rejected by the backing store. The serving path is
    /// unaffected; retries are the caller's responsibility.
    #[error("Statistics write failed: {0}")]
    StatisticsWriteFailed(String),

    /// Client error: empty query, limit out of range, bad filter bounds.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
