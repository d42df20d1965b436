//! Courier Core
//!
//! Composition root: configuration, logging and the `Courier` container that
//! owns the storage service and the client action creators for a login session.

mod config;
mod courier;
mod error;

pub use config::Config;
pub use courier::Courier;
pub use error::CoreError;

// Re-export core components
pub use courier_auth::{
    ApiError, BackendError, BackendLabel, ClientAction, ClientActions, ClientApi, ClientCore,
    ClientInfo, ClientState, ClientStore, Dispatch, LoginData, RegisteredClient,
};
pub use courier_storage::{
    FlagStore, MemoryFlags, ObjectStore, PrimaryKey, SettingsStore, StorageConfig, StorageError,
    StorageService,
};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).with_target(true).init();
}
