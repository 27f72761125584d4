use thiserror::Error;

/// Errors produced by the workflow core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// An operation did not settle within its deadline. The underlying call
    /// is abandoned, not cancelled - a late write may still land.
    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("document store error: {0}")]
    Storage(String),

    #[error("record store error: {0}")]
    Database(String),

    #[error("extraction gateway error: {0}")]
    Gateway(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => CoreError::NotFound("row not found".to_string()),
            other => CoreError::Database(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        CoreError::Gateway(e.to_string())
    }
}
