use rollcall_core::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("descriptor encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid database value: {0}")]
    InvalidValue(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Io(io) => StoreError::Io(io),
            DbError::InvalidValue(msg) => StoreError::Corrupt(msg),
            other => StoreError::backend(other),
        }
    }
}
