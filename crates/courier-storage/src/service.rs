//! Storage Service
//!
//! Owns the per-user database handle for one login session and exposes the
//! generic record operations. The handle moves through
//! `Uninitialized -> Opening -> Open -> Closed`; record operations need `Open`.

use parking_lot::RwLock;
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

use crate::database::Database;
use crate::error::StorageError;
use crate::flags::FlagStore;
use crate::migrations::Migration;
use crate::object_store;
use crate::record;
use crate::schema::{ObjectStore, PrimaryKey, StoreSchema};
use crate::versions::MIGRATIONS;
use crate::Result;

/// Lifetime class of the device registration, part of the database name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientType {
    Permanent,
    Temporary,
}

impl ClientType {
    pub fn from_persist(persist: bool) -> Self {
        if persist {
            ClientType::Permanent
        } else {
            ClientType::Temporary
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::Permanent => "permanent",
            ClientType::Temporary => "temporary",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding the database files; `None` keeps databases in memory
    pub data_dir: Option<PathBuf>,
    /// Backend environment the session talks to (`prod`, `staging`, ...)
    pub backend_environment: String,
    pub database_prefix: String,
}

impl StorageConfig {
    pub fn in_memory() -> Self {
        Self {
            data_dir: None,
            ..Self::default()
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            backend_environment: "prod".to_string(),
            database_prefix: "courier".to_string(),
        }
    }
}

pub fn database_name(
    prefix: &str,
    backend_environment: &str,
    user_id: &str,
    client_type: ClientType,
) -> String {
    format!(
        "{}@{}@{}@{}",
        prefix,
        backend_environment,
        user_id,
        client_type.as_str()
    )
}

/// User ids become part of a file name, so they may not leave `data_dir`
/// or contain the name separator
fn validate_user_id(user_id: &str) -> Result<()> {
    let invalid = user_id.is_empty()
        || user_id.contains(|c: char| matches!(c, '/' | '\\' | '@' | '\0'))
        || user_id.contains("..");
    if invalid {
        return Err(StorageError::InvalidUserId(user_id.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageStatus {
    Uninitialized,
    Opening,
    Open,
    Closed,
}

enum StorageState {
    Uninitialized,
    Opening,
    Open(Database),
    Closed,
}

pub struct StorageService {
    config: StorageConfig,
    migrations: &'static [Migration],
    flags: Arc<dyn FlagStore>,
    state: Arc<RwLock<StorageState>>,
    db_name: Arc<RwLock<Option<String>>>,
    /// File of the last initialized database, kept after the connection closes
    db_path: Arc<RwLock<Option<PathBuf>>>,
    user_id: Arc<RwLock<Option<String>>>,
}

impl StorageService {
    pub fn new(config: StorageConfig, flags: Arc<dyn FlagStore>) -> Self {
        Self {
            config,
            migrations: MIGRATIONS,
            flags,
            state: Arc::new(RwLock::new(StorageState::Uninitialized)),
            db_name: Arc::new(RwLock::new(None)),
            db_path: Arc::new(RwLock::new(None)),
            user_id: Arc::new(RwLock::new(None)),
        }
    }

    /// Open databases with a different list of schema versions
    pub fn with_migrations(mut self, migrations: &'static [Migration]) -> Self {
        self.migrations = migrations;
        self
    }

    pub fn status(&self) -> StorageStatus {
        match &*self.state.read() {
            StorageState::Uninitialized => StorageStatus::Uninitialized,
            StorageState::Opening => StorageStatus::Opening,
            StorageState::Open(_) => StorageStatus::Open,
            StorageState::Closed => StorageStatus::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status() == StorageStatus::Open
    }

    pub fn database_name(&self) -> Option<String> {
        self.db_name.read().clone()
    }

    pub fn user_id(&self) -> Option<String> {
        self.user_id.read().clone()
    }

    /// Schema version of the open database
    pub fn version(&self) -> Option<u32> {
        match &*self.state.read() {
            StorageState::Open(db) => Some(db.version()),
            _ => None,
        }
    }

    // === Initialization ===

    /// Open (creating or migrating as needed) the database of `user_id`.
    /// Resolves with the database name once all pending upgrades have run.
    pub async fn init(&self, user_id: &str) -> Result<String> {
        validate_user_id(user_id)?;

        let persist = match self.flags.persist_auth() {
            Ok(persist) => persist,
            Err(e) => {
                let name = format!(
                    "{}@{}@{}",
                    self.config.database_prefix, self.config.backend_environment, user_id
                );
                tracing::error!("Failed to read persist flag for database '{}': {}", name, e);
                *self.state.write() = StorageState::Closed;
                return Err(StorageError::FailedToOpen {
                    name,
                    reason: e.to_string(),
                });
            }
        };

        let name = database_name(
            &self.config.database_prefix,
            &self.config.backend_environment,
            user_id,
            ClientType::from_persist(persist),
        );

        let previous = std::mem::replace(&mut *self.state.write(), StorageState::Opening);
        if let StorageState::Open(_) = previous {
            tracing::warn!("Replacing open database connection before opening '{}'", name);
        }
        drop(previous);

        let path = self
            .config
            .data_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.db", name)));

        *self.user_id.write() = Some(user_id.to_string());
        *self.db_name.write() = Some(name.clone());
        *self.db_path.write() = path.clone();

        let migrations = self.migrations;
        let opened = tokio::task::spawn_blocking(move || match path {
            Some(path) => Database::open_with(path, migrations),
            None => Database::open_in_memory_with(migrations),
        })
        .await
        .map_err(StorageError::from)
        .and_then(|result| result);

        match opened {
            Ok(db) => {
                tracing::info!(
                    "Storage Service initialized with database '{}' version '{}'",
                    name,
                    db.version()
                );
                *self.state.write() = StorageState::Open(db);
                Ok(name)
            }
            Err(e) => {
                tracing::error!(
                    "Failed to initialize database '{}' for Storage Service: {}",
                    name,
                    e
                );
                *self.state.write() = StorageState::Closed;
                Err(StorageError::FailedToOpen {
                    name,
                    reason: e.to_string(),
                })
            }
        }
    }

    fn database(&self) -> Result<Database> {
        match &*self.state.read() {
            StorageState::Open(db) => Ok(db.clone()),
            _ => Err(StorageError::NotOpen),
        }
    }

    /// Run blocking work against one store of the open database on the blocking pool
    async fn run<F, T>(&self, store: ObjectStore, f: F) -> Result<T>
    where
        F: FnOnce(&Connection, &StoreSchema) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.run_with_database(move |db| {
            let schema = db.store_schema(store)?;
            db.with_connection(|conn| f(conn, schema))
        })
        .await
    }

    async fn run_with_database<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.database()?;
        tokio::task::spawn_blocking(move || f(&db)).await?
    }

    // === Interactions ===

    /// Upsert `entity` under `key`. Falsy entities (null, false, 0, "") are rejected.
    pub async fn save<T: Serialize>(
        &self,
        store: ObjectStore,
        key: impl Into<PrimaryKey>,
        entity: &T,
    ) -> Result<PrimaryKey> {
        let key = key.into();
        let value = serde_json::to_value(entity)?;
        if record::is_falsy(&value) {
            return Err(StorageError::NoData);
        }

        let result = {
            let key = key.clone();
            self.run(store, move |conn, schema| {
                object_store::put(conn, store, schema, &key, value)
            })
            .await
        };

        result.map(|_| key.clone()).map_err(|e| {
            tracing::error!("Failed to put '{}' into store '{}': {}", key, store, e);
            e
        })
    }

    /// Insert into a store that generates its own keys. Returns the new key.
    pub async fn add<T: Serialize>(&self, store: ObjectStore, entity: &T) -> Result<PrimaryKey> {
        let value = serde_json::to_value(entity)?;
        if record::is_falsy(&value) {
            return Err(StorageError::NoData);
        }

        self.run(store, move |conn, schema| object_store::add(conn, store, schema, value))
            .await
            .map_err(|e| {
                tracing::error!("Failed to add record into store '{}': {}", store, e);
                e
            })
    }

    /// Load a record. A missing key resolves to `None`.
    pub async fn load(&self, store: ObjectStore, key: impl Into<PrimaryKey>) -> Result<Option<Value>> {
        let key = key.into();
        let lookup = key.clone();

        self.run(store, move |conn, _| object_store::get(conn, store, &lookup))
        .await
        .map_err(|e| {
            tracing::error!("Failed to load '{}' from store '{}': {}", key, store, e);
            e
        })
    }

    pub async fn load_as<T: DeserializeOwned>(
        &self,
        store: ObjectStore,
        key: impl Into<PrimaryKey>,
    ) -> Result<Option<T>> {
        self.load(store, key)
            .await?
            .map(serde_json::from_value)
            .transpose()
            .map_err(Into::into)
    }

    /// All records of a store in key order, without falsy entries
    pub async fn get_all(&self, store: ObjectStore) -> Result<Vec<Value>> {
        self.run(store, move |conn, _| {
            let records = object_store::entries(conn, store)?
                .into_iter()
                .map(|(_, value)| value)
                .filter(|value| !record::is_falsy(value))
                .collect();
            Ok(records)
        })
        .await
        .map_err(|e| {
            tracing::error!("Failed to load objects from store '{}': {}", store, e);
            e
        })
    }

    /// Apply `changes` (dotted key path -> new value) to a record.
    /// Returns the number of updated records, 0 if the key is absent.
    pub async fn update(
        &self,
        store: ObjectStore,
        key: impl Into<PrimaryKey>,
        changes: &Value,
    ) -> Result<usize> {
        let key = key.into();
        let changes = changes.as_object().cloned().ok_or(StorageError::NoData)?;
        let target = key.clone();

        let updated = self
            .run(store, move |conn, schema| {
                object_store::update(conn, store, schema, &target, &changes)
            })
            .await
            .map_err(|e| {
                tracing::error!("Failed to update '{}' in store '{}': {}", key, store, e);
                e
            })?;

        tracing::info!(
            "Updated {} record(s) with key '{}' in store '{}'",
            updated,
            key,
            store
        );
        Ok(updated)
    }

    /// Remove a record. Resolves with the key, also when nothing was stored under it.
    pub async fn delete(&self, store: ObjectStore, key: impl Into<PrimaryKey>) -> Result<PrimaryKey> {
        let key = key.into();
        let target = key.clone();

        self.run(store, move |conn, _| object_store::delete(conn, store, &target))
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete '{}' from store '{}': {}", key, store, e);
            e
        })?;

        tracing::info!("Deleted '{}' from object store '{}'", key, store);
        Ok(key)
    }

    /// Remove every record of one store
    pub async fn delete_store(&self, store: ObjectStore) -> Result<()> {
        self.delete_stores(&[store]).await
    }

    pub async fn delete_stores(&self, stores: &[ObjectStore]) -> Result<()> {
        let stores = stores.to_vec();
        let db_name = self.database_name().unwrap_or_default();

        self.run_with_database(move |db| {
            for store in &stores {
                db.store_schema(*store)?;
            }
            db.transaction(|tx| {
                for store in &stores {
                    tracing::info!("Clearing object store '{}' in database '{}'", store, db_name);
                    object_store::clear(tx, *store)?;
                }
                Ok(())
            })
        })
        .await
    }

    /// Empty every store of the open database
    pub async fn clear_stores(&self) -> Result<()> {
        let stores: Vec<ObjectStore> = self.database()?.stores().collect();
        self.delete_stores(&stores).await
    }

    /// Close the connection and delete the database files of the last
    /// initialized user, whether or not the connection is still open.
    /// Resolves `true`, also when there was no database to delete.
    pub async fn delete_database(&self) -> Result<bool> {
        let name = self.database_name().unwrap_or_default();

        // The connection must be gone before its files are removed
        let previous = std::mem::replace(&mut *self.state.write(), StorageState::Closed);
        drop(previous);

        let Some(path) = self.db_path.read().clone() else {
            if self.database_name().is_none() {
                tracing::error!("Database '{}' not found", name);
            } else {
                tracing::info!("Clearing in-memory database '{}' successful", name);
            }
            return Ok(true);
        };

        let mut removed = false;
        for suffix in ["", "-wal", "-shm"] {
            let mut file = path.clone().into_os_string();
            file.push(suffix);
            match tokio::fs::remove_file(&file).await {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::error!("Clearing database '{}' failed: {}", name, e);
                    return Err(e.into());
                }
            }
        }

        if removed {
            tracing::info!("Clearing database '{}' successful", name);
        } else {
            tracing::error!("Database '{}' not found", name);
        }
        Ok(true)
    }

    /// Close the database connection immediately
    pub fn terminate(&self, reason: &str) {
        let previous = std::mem::replace(&mut *self.state.write(), StorageState::Closed);
        let name = self.database_name().unwrap_or_default();

        match previous {
            StorageState::Open(_) => {
                tracing::info!(
                    "Closing database connection with '{}' because of '{}'.",
                    name,
                    reason
                );
            }
            _ => tracing::debug!("No open database to close ({})", reason),
        }
    }
}

impl Clone for StorageService {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            migrations: self.migrations,
            flags: Arc::clone(&self.flags),
            state: Arc::clone(&self.state),
            db_name: Arc::clone(&self.db_name),
            db_path: Arc::clone(&self.db_path),
            user_id: Arc::clone(&self.user_id),
        }
    }
}
