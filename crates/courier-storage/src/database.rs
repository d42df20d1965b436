//! Database connection and operations

use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::StorageError;
use crate::migrations::{run_migrations, Migration, Schema};
use crate::schema::{ObjectStore, StoreSchema};
use crate::versions::MIGRATIONS;
use crate::Result;

/// An open per-user database, migrated to the latest declared version
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
    version: u32,
    schema: Arc<Schema>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, MIGRATIONS)
    }

    pub fn open_with<P: AsRef<Path>>(path: P, migrations: &[Migration]) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;

        // WAL mode for better concurrent performance
        let _: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

        Self::migrate(conn, Some(path), migrations)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with(MIGRATIONS)
    }

    pub fn open_in_memory_with(migrations: &[Migration]) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::migrate(conn, None, migrations)
    }

    fn migrate(mut conn: Connection, path: Option<PathBuf>, migrations: &[Migration]) -> Result<Self> {
        let version = run_migrations(&mut conn, migrations)?;
        let schema = migrations
            .iter()
            .find(|m| m.version == version)
            .map(Migration::schema)
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
            version,
            schema: Arc::new(schema),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Stores declared by the version this database is at
    pub fn stores(&self) -> impl Iterator<Item = ObjectStore> + '_ {
        self.schema.keys().copied()
    }

    pub fn store_schema(&self, store: ObjectStore) -> Result<&StoreSchema> {
        self.schema
            .get(&store)
            .ok_or_else(|| StorageError::DataStoreNotFound(store.to_string()))
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            path: self.path.clone(),
            version: self.version,
            schema: Arc::clone(&self.schema),
        }
    }
}
