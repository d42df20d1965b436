//! Storage error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to open database '{name}': {reason}")]
    FailedToOpen { name: String, reason: String },

    #[error("Object store not found: {0}")]
    DataStoreNotFound(String),

    #[error("No data to store")]
    NoData,

    #[error("Database is not open")]
    NotOpen,

    #[error("Invalid user id '{0}'")]
    InvalidUserId(String),

    #[error("Migration to version {version} failed: {reason}")]
    Migration { version: u32, reason: String },

    #[error("Invalid store schema '{definition}': {reason}")]
    InvalidSchema { definition: String, reason: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl StorageError {
    pub(crate) fn migration(version: u32, reason: impl Into<String>) -> Self {
        StorageError::Migration {
            version,
            reason: reason.into(),
        }
    }
}
