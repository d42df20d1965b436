//! Schema migration runner
//!
//! A database records the highest version it has reached in `schema_version`.
//! Opening runs every declared version above that, in order, each in its own
//! transaction together with its version bump. A fresh database is created
//! directly at the latest version without running any upgrade transforms.

use rusqlite::{Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

use crate::error::StorageError;
use crate::object_store;
use crate::schema::{ObjectStore, PrimaryKey, StoreSchema};
use crate::Result;

/// Store definitions in force at a given version
pub type Schema = BTreeMap<ObjectStore, StoreSchema>;

/// One-shot data transform run when moving up to a version
pub type UpgradeFn = fn(&Upgrade<'_>) -> Result<()>;

#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub stores: &'static [(ObjectStore, &'static str)],
    pub upgrade: Option<UpgradeFn>,
}

impl Migration {
    pub const fn new(version: u32, stores: &'static [(ObjectStore, &'static str)]) -> Self {
        Self {
            version,
            stores,
            upgrade: None,
        }
    }

    pub const fn with_upgrade(mut self, upgrade: UpgradeFn) -> Self {
        self.upgrade = Some(upgrade);
        self
    }

    pub fn schema(&self) -> Result<Schema> {
        self.stores
            .iter()
            .map(|(store, definition)| Ok((*store, StoreSchema::parse(definition)?)))
            .collect()
    }
}

/// Access to the stores of a database while an upgrade transform runs.
/// All writes belong to the transaction of the version being applied.
pub struct Upgrade<'a> {
    conn: &'a Connection,
    schema: &'a Schema,
    version: u32,
}

impl<'a> Upgrade<'a> {
    pub fn version(&self) -> u32 {
        self.version
    }

    fn store_schema(&self, store: ObjectStore) -> Result<&StoreSchema> {
        self.schema
            .get(&store)
            .ok_or_else(|| StorageError::DataStoreNotFound(store.to_string()))
    }

    pub fn keys(&self, store: ObjectStore) -> Result<Vec<PrimaryKey>> {
        self.store_schema(store)?;
        object_store::keys(self.conn, store)
    }

    pub fn entries(&self, store: ObjectStore) -> Result<Vec<(PrimaryKey, Value)>> {
        self.store_schema(store)?;
        object_store::entries(self.conn, store)
    }

    /// Run `f` over every record of a store and write back the ones it changed.
    /// Returns the number of records written.
    pub fn modify<F>(&self, store: ObjectStore, mut f: F) -> Result<usize>
    where
        F: FnMut(&PrimaryKey, &mut Value) -> Result<()>,
    {
        let schema = self.store_schema(store)?;
        let mut modified = 0;

        for (key, mut value) in object_store::entries(self.conn, store)? {
            let before = value.clone();
            f(&key, &mut value)?;
            if value != before {
                object_store::put(self.conn, store, schema, &key, value)?;
                modified += 1;
            }
        }

        Ok(modified)
    }

    pub fn put(&self, store: ObjectStore, key: &PrimaryKey, value: Value) -> Result<()> {
        let schema = self.store_schema(store)?;
        object_store::put(self.conn, store, schema, key, value)
    }

    pub fn add(&self, store: ObjectStore, value: Value) -> Result<PrimaryKey> {
        let schema = self.store_schema(store)?;
        object_store::add(self.conn, store, schema, value)
    }

    pub fn update(
        &self,
        store: ObjectStore,
        key: &PrimaryKey,
        changes: &Map<String, Value>,
    ) -> Result<usize> {
        let schema = self.store_schema(store)?;
        object_store::update(self.conn, store, schema, key, changes)
    }

    pub fn delete(&self, store: ObjectStore, key: &PrimaryKey) -> Result<usize> {
        self.store_schema(store)?;
        object_store::delete(self.conn, store, key)
    }
}

/// Bring the database up to the last declared version. Returns that version.
pub fn run_migrations(conn: &mut Connection, migrations: &[Migration]) -> Result<u32> {
    let latest = validate(migrations)?;
    let current = get_schema_version(conn)?;

    if current > latest.version {
        return Err(StorageError::migration(
            current,
            format!(
                "database version {} is newer than the latest known version {}",
                current, latest.version
            ),
        ));
    }

    if current == latest.version {
        return Ok(current);
    }

    if current == 0 {
        tracing::info!(version = latest.version, "Creating database schema");
        let schema = latest.schema()?;
        let tx = conn.transaction()?;
        apply_schema(&tx, &schema)?;
        set_schema_version(&tx, latest.version)?;
        tx.commit()?;
        return Ok(latest.version);
    }

    for migration in migrations.iter().filter(|m| m.version > current) {
        let schema = migration.schema()?;
        let tx = conn.transaction()?;

        apply_schema(&tx, &schema)?;

        if let Some(upgrade) = migration.upgrade {
            tracing::warn!("Database upgrade to version {}", migration.version);
            let context = Upgrade {
                conn: &tx,
                schema: &schema,
                version: migration.version,
            };
            upgrade(&context)
                .map_err(|e| StorageError::migration(migration.version, e.to_string()))?;
        }

        set_schema_version(&tx, migration.version)?;
        tx.commit()?;
    }

    Ok(latest.version)
}

fn validate(migrations: &[Migration]) -> Result<&Migration> {
    let latest = migrations
        .last()
        .ok_or_else(|| StorageError::migration(0, "no schema versions declared"))?;

    for pair in migrations.windows(2) {
        if pair[1].version <= pair[0].version {
            return Err(StorageError::migration(
                pair[1].version,
                "schema versions must be strictly increasing",
            ));
        }
    }

    if migrations[0].version == 0 {
        return Err(StorageError::migration(0, "schema versions start at 1"));
    }

    Ok(latest)
}

pub fn get_schema_version(conn: &Connection) -> Result<u32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: Option<u32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Make the tables and indexes match `schema` exactly
fn apply_schema(conn: &Connection, schema: &Schema) -> Result<()> {
    for store in existing_stores(conn)? {
        if !schema.contains_key(&store) {
            tracing::info!(store = %store, "Dropping object store");
            object_store::drop_table(conn, store)?;
        }
    }

    for (store, store_schema) in schema {
        object_store::create_table(conn, *store)?;
        sync_indexes(conn, *store, store_schema)?;
    }

    Ok(())
}

fn existing_stores(conn: &Connection) -> Result<Vec<ObjectStore>> {
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(names
        .iter()
        .filter_map(|name| name.parse::<ObjectStore>().ok())
        .collect())
}

fn sync_indexes(conn: &Connection, store: ObjectStore, schema: &StoreSchema) -> Result<()> {
    let wanted: HashSet<String> = schema.indexes.iter().map(|index| index.name(store)).collect();

    let existing = index_names(conn, store)?;

    for name in existing.iter().filter(|name| !wanted.contains(*name)) {
        tracing::debug!(store = %store, index = %name, "Dropping index");
        conn.execute_batch(&format!("DROP INDEX IF EXISTS \"{}\"", name))?;
    }

    for index in &schema.indexes {
        conn.execute_batch(&index.create_sql(store))?;
    }

    Ok(())
}

pub(crate) fn index_names(conn: &Connection, store: ObjectStore) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1 AND name GLOB 'idx_*' ORDER BY name",
    )?;
    let names = stmt
        .query_map([store.as_str()], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}
