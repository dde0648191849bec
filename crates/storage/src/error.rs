use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("row decode error: {0}")]
    Row(#[from] serde_rusqlite::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid thread id: {0:?}")]
    InvalidThreadId(String),
}

pub type Result<T> = std::result::Result<T, Error>;
