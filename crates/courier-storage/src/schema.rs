//! Object store identifiers, primary keys and store schema descriptors
//!
//! Store schemas are declared in the compact index syntax:
//! `"++primary_key, id, [conversation+time]"`. The first element names the
//! primary key (empty for caller-supplied keys), the rest are secondary
//! indexes on record key paths.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StorageError;
use crate::Result;

/// Named partitions of the local database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStore {
    Amplify,
    Clients,
    ConversationEvents,
    Conversations,
    Events,
    Keys,
    #[serde(rename = "prekeys")]
    PreKeys,
    Sessions,
    Users,
}

impl ObjectStore {
    pub const ALL: [ObjectStore; 9] = [
        ObjectStore::Amplify,
        ObjectStore::Clients,
        ObjectStore::ConversationEvents,
        ObjectStore::Conversations,
        ObjectStore::Events,
        ObjectStore::Keys,
        ObjectStore::PreKeys,
        ObjectStore::Sessions,
        ObjectStore::Users,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectStore::Amplify => "amplify",
            ObjectStore::Clients => "clients",
            ObjectStore::ConversationEvents => "conversation_events",
            ObjectStore::Conversations => "conversations",
            ObjectStore::Events => "events",
            ObjectStore::Keys => "keys",
            ObjectStore::PreKeys => "prekeys",
            ObjectStore::Sessions => "sessions",
            ObjectStore::Users => "users",
        }
    }
}

impl fmt::Display for ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectStore {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ObjectStore::ALL
            .iter()
            .copied()
            .find(|store| store.as_str() == s)
            .ok_or_else(|| StorageError::DataStoreNotFound(s.to_string()))
    }
}

/// Primary key of a record within a store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKey {
    Number(i64),
    Text(String),
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimaryKey::Number(n) => write!(f, "{}", n),
            PrimaryKey::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for PrimaryKey {
    fn from(value: &str) -> Self {
        PrimaryKey::Text(value.to_string())
    }
}

impl From<String> for PrimaryKey {
    fn from(value: String) -> Self {
        PrimaryKey::Text(value)
    }
}

impl From<&String> for PrimaryKey {
    fn from(value: &String) -> Self {
        PrimaryKey::Text(value.clone())
    }
}

impl From<i64> for PrimaryKey {
    fn from(value: i64) -> Self {
        PrimaryKey::Number(value)
    }
}

impl From<&PrimaryKey> for PrimaryKey {
    fn from(value: &PrimaryKey) -> Self {
        value.clone()
    }
}

impl ToSql for PrimaryKey {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            PrimaryKey::Number(n) => Ok(ToSqlOutput::from(*n)),
            PrimaryKey::Text(s) => Ok(ToSqlOutput::from(s.as_str())),
        }
    }
}

impl FromSql for PrimaryKey {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(n) => Ok(PrimaryKey::Number(n)),
            ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                .map(|s| PrimaryKey::Text(s.to_string()))
                .map_err(|e| FromSqlError::Other(Box::new(e))),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

/// Where a store's primary key comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryKeySpec {
    /// Supplied by the caller, not part of the record
    Outbound,
    /// Read from the record at the given key path
    Inbound(String),
    /// Generated integer, also written into the record at the key path
    AutoIncrement(String),
}

impl PrimaryKeySpec {
    pub fn key_path(&self) -> Option<&str> {
        match self {
            PrimaryKeySpec::Outbound => None,
            PrimaryKeySpec::Inbound(path) | PrimaryKeySpec::AutoIncrement(path) => Some(path),
        }
    }
}

/// A secondary index over one key path, or several for a compound index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub key_paths: Vec<String>,
}

impl IndexSpec {
    pub fn is_compound(&self) -> bool {
        self.key_paths.len() > 1
    }

    /// SQLite index name, unique per store
    pub fn name(&self, store: ObjectStore) -> String {
        let paths: Vec<String> = self
            .key_paths
            .iter()
            .map(|path| path.replace('.', "_"))
            .collect();
        format!("idx_{}_{}", store.as_str(), paths.join("__"))
    }

    pub(crate) fn create_sql(&self, store: ObjectStore) -> String {
        let columns: Vec<String> = self
            .key_paths
            .iter()
            .map(|path| format!("json_extract(value, '$.{}')", path))
            .collect();
        format!(
            "CREATE INDEX IF NOT EXISTS \"{}\" ON \"{}\" ({})",
            self.name(store),
            store.as_str(),
            columns.join(", ")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSchema {
    pub primary_key: PrimaryKeySpec,
    pub indexes: Vec<IndexSpec>,
}

impl StoreSchema {
    pub fn parse(definition: &str) -> Result<Self> {
        let mut parts = definition.split(',').map(str::trim);

        let primary = parts.next().unwrap_or_default();
        let primary_key = if primary.is_empty() {
            PrimaryKeySpec::Outbound
        } else if let Some(path) = primary.strip_prefix("++") {
            PrimaryKeySpec::AutoIncrement(validate_key_path(definition, path)?)
        } else {
            PrimaryKeySpec::Inbound(validate_key_path(definition, primary)?)
        };

        let indexes = parts
            .map(|part| parse_index(definition, part))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            primary_key,
            indexes,
        })
    }

    pub fn is_auto_increment(&self) -> bool {
        matches!(self.primary_key, PrimaryKeySpec::AutoIncrement(_))
    }
}

fn parse_index(definition: &str, part: &str) -> Result<IndexSpec> {
    let key_paths = match part.strip_prefix('[') {
        Some(rest) => {
            let inner = rest.strip_suffix(']').ok_or_else(|| StorageError::InvalidSchema {
                definition: definition.to_string(),
                reason: format!("unterminated compound index '{}'", part),
            })?;
            inner
                .split('+')
                .map(|path| validate_key_path(definition, path.trim()))
                .collect::<Result<Vec<_>>>()?
        }
        None => vec![validate_key_path(definition, part)?],
    };

    Ok(IndexSpec { key_paths })
}

// Key paths end up inside SQL string literals, so only plain identifiers are accepted.
fn validate_key_path(definition: &str, path: &str) -> Result<String> {
    let valid = !path.is_empty()
        && path
            .split('.')
            .all(|segment| !segment.is_empty() && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));

    if valid {
        Ok(path.to_string())
    } else {
        Err(StorageError::InvalidSchema {
            definition: definition.to_string(),
            reason: format!("invalid key path '{}'", path),
        })
    }
}
