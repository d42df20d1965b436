//! Declared schema versions of the per-user database
//!
//! Each version lists the complete set of stores in force from that version
//! on. Upgrade transforms fix up data written by older releases and only ever
//! run when an existing database moves past their version.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{json, Value};

use crate::category::{category_from_event, event_type};
use crate::migrations::{Migration, Upgrade};
use crate::record;
use crate::schema::{ObjectStore, PrimaryKey};
use crate::Result;

use ObjectStore::*;

/// Primary key under which the local device's own client record is kept
pub const PRIMARY_KEY_CURRENT_CLIENT: &str = "local_identity";

pub const CURRENT_VERSION: u32 = 15;

const VERSION_1: &[(ObjectStore, &str)] = &[
    (Amplify, ""),
    (Clients, ""),
    (ConversationEvents, ", raw.conversation, raw.time, meta.timestamp"),
    (Keys, ""),
    (PreKeys, ""),
    (Sessions, ""),
];

const VERSION_2: &[(ObjectStore, &str)] = &[
    (Amplify, ""),
    (Clients, ""),
    (ConversationEvents, ", raw.conversation, raw.time, raw.type, meta.timestamp"),
    (Keys, ""),
    (PreKeys, ""),
    (Sessions, ""),
];

const VERSION_3: &[(ObjectStore, &str)] = &[
    (Amplify, ""),
    (Clients, ""),
    (ConversationEvents, ", raw.conversation, raw.time, raw.type, meta.timestamp"),
    (Conversations, ", id, last_event_timestamp"),
    (Keys, ""),
    (PreKeys, ""),
    (Sessions, ""),
];

const VERSION_4: &[(ObjectStore, &str)] = &[
    (Amplify, ""),
    (Clients, ", meta.primary_key"),
    (ConversationEvents, ", raw.conversation, raw.time, raw.type, meta.timestamp"),
    (Conversations, ", id, last_event_timestamp"),
    (Keys, ""),
    (PreKeys, ""),
    (Sessions, ""),
];

const VERSION_5: &[(ObjectStore, &str)] = &[
    (Amplify, ""),
    (Clients, ", meta.primary_key"),
    (ConversationEvents, ", conversation, time, type"),
    (Conversations, ", id, last_event_timestamp"),
    (Keys, ""),
    (PreKeys, ""),
    (Sessions, ""),
];

const VERSION_9: &[(ObjectStore, &str)] = &[
    (Amplify, ""),
    (Clients, ", meta.primary_key"),
    (ConversationEvents, ", conversation, time, type, [conversation+time]"),
    (Conversations, ", id, last_event_timestamp"),
    (Keys, ""),
    (PreKeys, ""),
    (Sessions, ""),
];

const VERSION_10: &[(ObjectStore, &str)] = &[
    (Amplify, ""),
    (Clients, ", meta.primary_key"),
    (
        ConversationEvents,
        ", category, conversation, time, type, [conversation+time], [conversation+category]",
    ),
    (Conversations, ", id, last_event_timestamp"),
    (Keys, ""),
    (PreKeys, ""),
    (Sessions, ""),
];

const VERSION_12: &[(ObjectStore, &str)] = &[
    (Amplify, ""),
    (Clients, ", meta.primary_key"),
    (
        ConversationEvents,
        ", category, conversation, time, type, [conversation+time], [conversation+category]",
    ),
    (Conversations, ", id, last_event_timestamp"),
    (
        Events,
        "++primary_key, id, category, conversation, time, type, [conversation+time], [conversation+category]",
    ),
    (Keys, ""),
    (PreKeys, ""),
    (Sessions, ""),
];

const VERSION_15: &[(ObjectStore, &str)] = &[
    (Amplify, ""),
    (Clients, ", meta.primary_key"),
    (
        ConversationEvents,
        ", category, conversation, time, type, [conversation+time], [conversation+category]",
    ),
    (Conversations, ", id, last_event_timestamp"),
    (
        Events,
        "++primary_key, id, category, conversation, time, type, [conversation+time], [conversation+category]",
    ),
    (Keys, ""),
    (PreKeys, ""),
    (Sessions, ""),
    (Users, ", id"),
];

pub const MIGRATIONS: &[Migration] = &[
    Migration::new(1, VERSION_1),
    Migration::new(2, VERSION_2),
    Migration::new(3, VERSION_3),
    Migration::new(4, VERSION_4).with_upgrade(verify_local_clients),
    Migration::new(5, VERSION_4),
    Migration::new(6, VERSION_4).with_upgrade(copy_keys_into_records),
    Migration::new(7, VERSION_5).with_upgrade(flatten_conversation_events),
    Migration::new(8, VERSION_5).with_upgrade(normalize_delete_everywhere_time),
    Migration::new(9, VERSION_9),
    Migration::new(10, VERSION_10).with_upgrade(categorize_conversation_events),
    Migration::new(11, VERSION_10).with_upgrade(rekey_current_client),
    Migration::new(12, VERSION_10).with_upgrade(decode_serialised_keys),
    Migration::new(13, VERSION_12).with_upgrade(copy_conversation_events),
    Migration::new(14, VERSION_12).with_upgrade(rename_asset_meta_events),
    Migration::new(15, VERSION_15),
];

fn verify_local_clients(upgrade: &Upgrade<'_>) -> Result<()> {
    upgrade.modify(Clients, |_, client| {
        record::set_path(
            client,
            "meta",
            json!({"is_verified": true, "primary_key": PRIMARY_KEY_CURRENT_CLIENT}),
        );
        Ok(())
    })?;
    Ok(())
}

fn copy_keys_into_records(upgrade: &Upgrade<'_>) -> Result<()> {
    for store in [Conversations, Sessions, PreKeys] {
        upgrade.modify(store, |key, value| {
            record::set_path(value, "id", serde_json::to_value(key)?);
            Ok(())
        })?;
    }
    Ok(())
}

fn flatten_conversation_events(upgrade: &Upgrade<'_>) -> Result<()> {
    upgrade.modify(ConversationEvents, |_, event| {
        let mapped = record::remove_key(event, "mapped").filter(|v| !v.is_null());
        let raw = record::remove_key(event, "raw");
        record::remove_key(event, "meta");

        if let Some(source) = mapped.or(raw) {
            record::extend(event, source);
        }
        Ok(())
    })?;
    Ok(())
}

fn normalize_delete_everywhere_time(upgrade: &Upgrade<'_>) -> Result<()> {
    upgrade.modify(ConversationEvents, |key, event| {
        if event.get("type").and_then(Value::as_str) != Some(event_type::DELETE_EVERYWHERE) {
            return Ok(());
        }

        let time = event.get("time").unwrap_or(&Value::Null);
        let normalized = iso_timestamp(time).ok_or_else(|| {
            crate::StorageError::migration(
                upgrade.version(),
                format!("event '{}' has an invalid time: {}", key, time),
            )
        })?;
        record::set_path(event, "time", Value::String(normalized));
        Ok(())
    })?;
    Ok(())
}

/// Canonical UTC timestamp with milliseconds, e.g. `2016-08-04T13:28:33.389Z`.
/// Accepts epoch milliseconds or any RFC 3339 string.
pub fn iso_timestamp(time: &Value) -> Option<String> {
    let parsed: DateTime<Utc> = match time {
        Value::Number(n) => Utc.timestamp_millis_opt(n.as_i64()?).single()?,
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()?,
        _ => return None,
    };

    Some(parsed.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn categorize_conversation_events(upgrade: &Upgrade<'_>) -> Result<()> {
    upgrade.modify(ConversationEvents, |_, event| {
        let category = category_from_event(event).bits();
        record::set_path(event, "category", json!(category));
        Ok(())
    })?;
    Ok(())
}

fn rekey_current_client(upgrade: &Upgrade<'_>) -> Result<()> {
    let expected = PrimaryKey::from(PRIMARY_KEY_CURRENT_CLIENT);

    for (key, client) in upgrade.entries(Clients)? {
        let meta_key = record::get_path(&client, "meta.primary_key").and_then(Value::as_str);
        let own_key = client.get("primary_key").and_then(Value::as_str);

        if meta_key == Some(PRIMARY_KEY_CURRENT_CLIENT) && own_key == Some(PRIMARY_KEY_CURRENT_CLIENT) {
            upgrade.delete(Clients, &key)?;
            upgrade.put(Clients, &expected, client)?;
        }
    }
    Ok(())
}

fn decode_serialised_keys(upgrade: &Upgrade<'_>) -> Result<()> {
    for store in [Keys, PreKeys, Sessions] {
        upgrade.modify(store, |key, value| {
            let Some(encoded) = value.get("serialised").and_then(Value::as_str) else {
                return Ok(());
            };

            let bytes = BASE64.decode(encoded).map_err(|e| {
                crate::StorageError::migration(
                    upgrade.version(),
                    format!("record '{}' in '{}' is not valid base64: {}", key, store, e),
                )
            })?;
            record::set_path(value, "serialised", json!(bytes));
            Ok(())
        })?;
    }
    Ok(())
}

fn copy_conversation_events(upgrade: &Upgrade<'_>) -> Result<()> {
    let events = upgrade.entries(ConversationEvents)?;
    let copied = events.len();

    for (_, event) in events {
        upgrade.add(Events, event)?;
    }

    tracing::info!(count = copied, "Copied conversation events into events store");
    Ok(())
}

fn rename_asset_meta_events(upgrade: &Upgrade<'_>) -> Result<()> {
    upgrade.modify(Events, |_, event| {
        if event.get("type").and_then(Value::as_str) == Some(event_type::ASSET_META) {
            record::set_path(event, "type", json!(event_type::ASSET_ADD));
        }
        Ok(())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::MessageCategory;
    use crate::migrations::{get_schema_version, index_names, run_migrations};
    use crate::object_store;
    use rusqlite::Connection;

    fn insert(conn: &Connection, store: ObjectStore, key: &str, value: Value) {
        conn.execute(
            &format!("INSERT INTO \"{}\" (pk, value) VALUES (?1, ?2)", store.as_str()),
            rusqlite::params![key, value.to_string()],
        )
        .unwrap();
    }

    fn get(conn: &Connection, store: ObjectStore, key: &str) -> Value {
        object_store::get(conn, store, &PrimaryKey::from(key))
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_versions_are_complete() {
        assert_eq!(MIGRATIONS.len() as u32, CURRENT_VERSION);
        assert_eq!(MIGRATIONS.last().unwrap().version, CURRENT_VERSION);
        for migration in MIGRATIONS {
            migration.schema().unwrap();
        }
    }

    #[test]
    fn test_iso_timestamp() {
        assert_eq!(
            iso_timestamp(&json!(1470317313389i64)).as_deref(),
            Some("2016-08-04T13:28:33.389Z")
        );
        assert_eq!(
            iso_timestamp(&json!("2016-08-04T15:28:33.389+02:00")).as_deref(),
            Some("2016-08-04T13:28:33.389Z")
        );
        assert_eq!(iso_timestamp(&json!("yesterday")), None);
    }

    #[test]
    fn test_upgrade_legacy_database_to_current() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn, &MIGRATIONS[..3]).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 3);

        insert(&conn, Clients, "local_identity", json!({"id": "own", "primary_key": "local_identity"}));
        insert(&conn, Clients, "legacy-client", json!({"id": "legacy", "primary_key": "local_identity"}));
        insert(&conn, Conversations, "conv-1", json!({"name": "Team"}));
        insert(&conn, Sessions, "session-1", json!({"serialised": "AQID"}));
        insert(&conn, PreKeys, "prekey-1", json!({"serialised": "BAU="}));
        insert(&conn, Keys, "local_identity", json!({"serialised": "Bg=="}));
        insert(
            &conn,
            ConversationEvents,
            "event-1",
            json!({
                "raw": {
                    "conversation": "conv-1",
                    "id": "event-1",
                    "time": "2016-08-04T13:28:33.389Z",
                    "type": "conversation.message-add",
                    "data": {"content": "hello"}
                },
                "meta": {"timestamp": 1470317313389i64}
            }),
        );
        insert(
            &conn,
            ConversationEvents,
            "event-2",
            json!({
                "mapped": {
                    "conversation": "conv-1",
                    "id": "event-2",
                    "time": 1470317313389i64,
                    "type": "conversation.delete-everywhere"
                },
                "raw": {"ignored": true}
            }),
        );
        insert(
            &conn,
            ConversationEvents,
            "event-3",
            json!({
                "raw": {
                    "conversation": "conv-1",
                    "id": "event-3",
                    "time": "2016-08-04T13:30:00.000Z",
                    "type": "conversation.asset-meta",
                    "data": {"content_type": "image/png"}
                }
            }),
        );

        assert_eq!(run_migrations(&mut conn, MIGRATIONS).unwrap(), CURRENT_VERSION);

        // v4 and v11
        let own = get(&conn, Clients, "local_identity");
        assert_eq!(own["meta"], json!({"is_verified": true, "primary_key": "local_identity"}));
        assert!(object_store::get(&conn, Clients, &PrimaryKey::from("legacy-client"))
            .unwrap()
            .is_none());

        // v6
        assert_eq!(get(&conn, Conversations, "conv-1")["id"], "conv-1");
        assert_eq!(get(&conn, Sessions, "session-1")["id"], "session-1");

        // v7, v8 and v10
        let flattened = get(&conn, ConversationEvents, "event-1");
        assert_eq!(flattened["conversation"], "conv-1");
        assert!(flattened.get("raw").is_none());
        assert!(flattened.get("meta").is_none());
        assert_eq!(flattened["category"], json!(MessageCategory::TEXT.bits()));

        let deleted = get(&conn, ConversationEvents, "event-2");
        assert_eq!(deleted["time"], "2016-08-04T13:28:33.389Z");
        assert!(deleted.get("ignored").is_none());

        // v12
        assert_eq!(get(&conn, Sessions, "session-1")["serialised"], json!([1, 2, 3]));
        assert_eq!(get(&conn, PreKeys, "prekey-1")["serialised"], json!([4, 5]));
        assert_eq!(get(&conn, Keys, "local_identity")["serialised"], json!([6]));

        // v13 and v14
        let events = object_store::entries(&conn, Events).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].0, PrimaryKey::Number(1));
        assert_eq!(events[0].1["primary_key"], 1);
        let renamed = events
            .iter()
            .find(|(_, event)| event["id"] == "event-3")
            .unwrap();
        assert_eq!(renamed.1["type"], event_type::ASSET_ADD);

        // v15
        assert_eq!(index_names(&conn, Users).unwrap(), vec!["idx_users_id".to_string()]);
        assert!(index_names(&conn, ConversationEvents)
            .unwrap()
            .contains(&"idx_conversation_events_conversation__category".to_string()));
    }

    #[test]
    fn test_current_database_is_left_alone() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn, MIGRATIONS).unwrap();

        // A client without meta would be rewritten by version 4 if it ran again
        insert(&conn, Clients, "c1", json!({"id": "c1"}));
        assert_eq!(run_migrations(&mut conn, MIGRATIONS).unwrap(), CURRENT_VERSION);
        assert_eq!(get(&conn, Clients, "c1"), json!({"id": "c1"}));
    }

    #[test]
    fn test_invalid_serialised_key_fails_upgrade() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn, &MIGRATIONS[..11]).unwrap();
        insert(&conn, Sessions, "broken", json!({"serialised": "***"}));

        let err = run_migrations(&mut conn, MIGRATIONS).unwrap_err();
        assert!(matches!(err, crate::StorageError::Migration { version: 12, .. }));
        assert_eq!(get_schema_version(&conn).unwrap(), 11);
    }

    #[test]
    fn test_invalid_delete_everywhere_time_fails_upgrade() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn, &MIGRATIONS[..7]).unwrap();
        insert(
            &conn,
            ConversationEvents,
            "event-1",
            json!({"conversation": "conv-1", "type": "conversation.delete-everywhere", "time": "soon"}),
        );

        let err = run_migrations(&mut conn, MIGRATIONS).unwrap_err();
        assert!(matches!(err, crate::StorageError::Migration { version: 8, .. }));
        assert_eq!(get_schema_version(&conn).unwrap(), 7);
        assert_eq!(get(&conn, ConversationEvents, "event-1")["time"], "soon");
    }
}
