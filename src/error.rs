use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Token not found: {0}")]
    TokenNotFound(String),

    #[error("No token address available: {0}")]
    MissingAddress(String),

    #[error("Invalid token address: {0}")]
    InvalidAddress(String),

    #[error("Holder list fetch failed: {0}")]
    HolderFetch(String),

    #[error("Cache error: {0}")]
    CacheError(String),
}
