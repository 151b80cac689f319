use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Contribution not found: {id}")]
    NotFound { id: Uuid },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn from_sqlx(e: sqlx::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}
