#![forbid(unsafe_code)]

use thiserror::Error;

pub type DbResult<T> = Result<T, DbError>;

/// Errors produced by `aulos-db`.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open database after {attempts} attempts: {source}")]
    OpenFailed {
        attempts: u32,
        source: Box<DbError>,
    },

    #[error("unknown store: {0}")]
    StoreNotFound(String),

    #[error("invalid store name: {0}")]
    InvalidStoreName(String),

    #[error("operation aborted")]
    OperationAborted,
}

impl From<r2d2::Error> for DbError {
    fn from(e: r2d2::Error) -> Self {
        Self::Pool(e.to_string())
    }
}
