//! Record-level operations on a single object store table
//!
//! Each store is one table `(pk, value)` where `value` is the JSON record.
//! The key column has no declared type, so text and integer keys keep their
//! own identity and ordering.

use rusqlite::{Connection, OptionalExtension};
use serde_json::{Map, Value};

use crate::record;
use crate::schema::{ObjectStore, PrimaryKey, PrimaryKeySpec, StoreSchema};
use crate::Result;

pub(crate) fn create_table(conn: &Connection, store: ObjectStore) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS \"{}\" (pk PRIMARY KEY NOT NULL, value TEXT NOT NULL)",
        store.as_str()
    ))?;
    Ok(())
}

pub(crate) fn drop_table(conn: &Connection, store: ObjectStore) -> Result<()> {
    conn.execute_batch(&format!("DROP TABLE IF EXISTS \"{}\"", store.as_str()))?;
    Ok(())
}

pub(crate) fn get(conn: &Connection, store: ObjectStore, key: &PrimaryKey) -> Result<Option<Value>> {
    let raw: Option<String> = conn
        .query_row(
            &format!("SELECT value FROM \"{}\" WHERE pk = ?1", store.as_str()),
            [key],
            |row| row.get(0),
        )
        .optional()?;

    raw.map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(Into::into)
}

pub(crate) fn entries(conn: &Connection, store: ObjectStore) -> Result<Vec<(PrimaryKey, Value)>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT pk, value FROM \"{}\" ORDER BY pk",
        store.as_str()
    ))?;

    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, PrimaryKey>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|(key, json)| Ok((key, serde_json::from_str(&json)?)))
        .collect()
}

pub(crate) fn keys(conn: &Connection, store: ObjectStore) -> Result<Vec<PrimaryKey>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT pk FROM \"{}\" ORDER BY pk",
        store.as_str()
    ))?;
    let keys = stmt
        .query_map([], |row| row.get::<_, PrimaryKey>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(keys)
}

/// Insert or replace a record. Stores with an inbound key path get the key
/// written into the record as well.
pub(crate) fn put(
    conn: &Connection,
    store: ObjectStore,
    schema: &StoreSchema,
    key: &PrimaryKey,
    mut value: Value,
) -> Result<()> {
    if let Some(path) = schema.primary_key.key_path() {
        record::set_path(&mut value, path, serde_json::to_value(key)?);
    }

    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO \"{}\" (pk, value) VALUES (?1, ?2)",
            store.as_str()
        ),
        rusqlite::params![key, serde_json::to_string(&value)?],
    )?;
    Ok(())
}

/// Insert a record into an auto-increment store under the next free key.
/// For other stores the key is read from the record's key path.
pub(crate) fn add(
    conn: &Connection,
    store: ObjectStore,
    schema: &StoreSchema,
    value: Value,
) -> Result<PrimaryKey> {
    let key = match &schema.primary_key {
        PrimaryKeySpec::AutoIncrement(_) => PrimaryKey::Number(next_key(conn, store)?),
        PrimaryKeySpec::Inbound(path) => record::get_path(&value, path)
            .cloned()
            .map(serde_json::from_value::<PrimaryKey>)
            .transpose()?
            .ok_or(crate::StorageError::NoData)?,
        PrimaryKeySpec::Outbound => return Err(crate::StorageError::NoData),
    };

    put(conn, store, schema, &key, value)?;
    Ok(key)
}

fn next_key(conn: &Connection, store: ObjectStore) -> Result<i64> {
    let next = conn.query_row(
        &format!(
            "SELECT COALESCE(MAX(pk), 0) + 1 FROM \"{}\" WHERE typeof(pk) = 'integer'",
            store.as_str()
        ),
        [],
        |row| row.get(0),
    )?;
    Ok(next)
}

/// Apply key-path changes to a stored record. Returns the number of records changed.
pub(crate) fn update(
    conn: &Connection,
    store: ObjectStore,
    schema: &StoreSchema,
    key: &PrimaryKey,
    changes: &Map<String, Value>,
) -> Result<usize> {
    let Some(mut value) = get(conn, store, key)? else {
        return Ok(0);
    };

    let before = value.clone();
    for (path, change) in changes {
        record::set_path(&mut value, path, change.clone());
    }

    if value == before {
        return Ok(0);
    }

    put(conn, store, schema, key, value)?;
    Ok(1)
}

pub(crate) fn delete(conn: &Connection, store: ObjectStore, key: &PrimaryKey) -> Result<usize> {
    let deleted = conn.execute(
        &format!("DELETE FROM \"{}\" WHERE pk = ?1", store.as_str()),
        [key],
    )?;
    Ok(deleted)
}

pub(crate) fn clear(conn: &Connection, store: ObjectStore) -> Result<usize> {
    let deleted = conn.execute(&format!("DELETE FROM \"{}\"", store.as_str()), [])?;
    Ok(deleted)
}
