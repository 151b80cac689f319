use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Cache configuration error: {0}")]
    Configuration(String),
}
