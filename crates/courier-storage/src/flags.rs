//! Device-local preference flags
//!
//! Flags live outside the per-user database because they are needed before
//! that database can be named (the persist flag picks the client type).

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::Result;

/// Whether the user asked to stay logged in across sessions
pub const PERSIST_AUTH: &str = "z.storage.StorageKey.AUTH.PERSIST";

pub trait FlagStore: Send + Sync {
    fn get_flag(&self, key: &str) -> Result<Option<bool>>;

    fn set_flag(&self, key: &str, value: bool) -> Result<()>;

    fn persist_auth(&self) -> Result<bool> {
        Ok(self.get_flag(PERSIST_AUTH)?.unwrap_or(false))
    }
}

/// Flags kept in a small settings database shared by every user on the device
pub struct SettingsStore {
    conn: Arc<Mutex<Connection>>,
}

impl SettingsStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
        "#,
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let updated_at = Utc::now().to_rfc3339();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![key, value, updated_at],
        )?;
        Ok(())
    }
}

impl FlagStore for SettingsStore {
    fn get_flag(&self, key: &str) -> Result<Option<bool>> {
        let Some(raw) = self.get_setting(key)? else {
            return Ok(None);
        };

        match serde_json::from_str::<bool>(&raw) {
            Ok(flag) => Ok(Some(flag)),
            Err(e) => {
                tracing::warn!(key = %key, value = %raw, "Ignoring non-boolean flag: {}", e);
                Ok(None)
            }
        }
    }

    fn set_flag(&self, key: &str, value: bool) -> Result<()> {
        self.set_setting(key, &value.to_string())
    }
}

impl Clone for SettingsStore {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
        }
    }
}

/// Flags that only live as long as the process
#[derive(Debug, Default, Clone)]
pub struct MemoryFlags {
    flags: Arc<RwLock<HashMap<String, bool>>>,
}

impl MemoryFlags {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlagStore for MemoryFlags {
    fn get_flag(&self, key: &str) -> Result<Option<bool>> {
        Ok(self.flags.read().get(key).copied())
    }

    fn set_flag(&self, key: &str, value: bool) -> Result<()> {
        self.flags.write().insert(key.to_string(), value);
        Ok(())
    }
}
