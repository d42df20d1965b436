//! Courier Storage Layer
//!
//! Per-user object store database on SQLite. Every store keeps JSON records
//! under a primary key; the schema is declared per version and existing
//! databases are migrated forward on open.

pub mod category;
mod database;
mod error;
pub mod flags;
pub mod migrations;
mod object_store;
pub mod record;
pub mod schema;
mod service;
pub mod versions;

pub use category::MessageCategory;
pub use database::Database;
pub use error::StorageError;
pub use flags::{FlagStore, MemoryFlags, SettingsStore, PERSIST_AUTH};
pub use schema::{ObjectStore, PrimaryKey};
pub use service::{database_name, ClientType, StorageConfig, StorageService, StorageStatus};
pub use versions::{CURRENT_VERSION, PRIMARY_KEY_CURRENT_CLIENT};

pub type Result<T> = std::result::Result<T, StorageError>;
