//! The storage/authorization boundary injected into the synchronization core.
//!
//! `StorageAdapter` is the only way the core touches persistence or policy: it
//! never opens a database connection or makes an authorization decision itself.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;

use crate::document::Document;
use crate::error::AdapterError;
use crate::state::{EditMessage, RoomState};

/// Storage and authorization collaborator for a room.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Returns the persisted or freshly constructed seed document for `room`.
    async fn get_data(&self, room: &str, user_id: &str) -> Result<Document, AdapterError>;

    /// Authorizes an inbound edit message against the room's current state.
    /// `false` means the edit message is silently dropped, not an error.
    async fn check_diffs(&self, edit_message: &EditMessage, room_state: &RoomState) -> Result<bool, AdapterError>;

    /// Persists `server_copy` for `room`. `edits` is informational only.
    async fn store_data(
        &self,
        room: &str,
        user_id: &str,
        server_copy: &Document,
        edits: &[crate::state::Edit],
    ) -> Result<(), AdapterError>;
}

/// Trivial in-process adapter used by tests, property tests, and `bin/demo.rs`.
///
/// Seeds every unseen room with `{}`, permits every edit, and stores snapshots in
/// a concurrent map rather than on disk.
#[derive(Debug, Default)]
pub struct InMemoryAdapter {
    rooms: DashMap<String, Document>,
}

impl InMemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds `room` with `doc` up front, so tests can assert against a known
    /// starting document instead of the `{}` default.
    pub fn seed(&self, room: impl Into<String>, doc: Document) {
        self.rooms.insert(room.into(), doc);
    }

    /// Returns the last snapshot stored for `room`, if any.
    pub fn snapshot(&self, room: &str) -> Option<Document> {
        self.rooms.get(room).map(|entry| entry.clone())
    }
}

#[async_trait]
impl StorageAdapter for InMemoryAdapter {
    async fn get_data(&self, room: &str, _user_id: &str) -> Result<Document, AdapterError> {
        Ok(self
            .rooms
            .entry(room.to_string())
            .or_insert_with(|| json!({}))
            .clone())
    }

    async fn check_diffs(&self, _edit_message: &EditMessage, _room_state: &RoomState) -> Result<bool, AdapterError> {
        Ok(true)
    }

    async fn store_data(
        &self,
        room: &str,
        _user_id: &str,
        server_copy: &Document,
        _edits: &[crate::state::Edit],
    ) -> Result<(), AdapterError> {
        self.rooms.insert(room.to_string(), server_copy.clone());
        Ok(())
    }
}

/// `rusqlite`-backed adapter: one row per room holding the serialized
/// `server_copy` and a save counter. Every call bridges to a blocking task
/// since `rusqlite::Connection` is not async.
pub struct SqliteAdapter {
    conn: std::sync::Arc<tokio::sync::Mutex<rusqlite::Connection>>,
}

impl SqliteAdapter {
    pub fn open<P: AsRef<std::path::Path>>(db_path: P) -> Result<Self, AdapterError> {
        let conn = rusqlite::Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, AdapterError> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: rusqlite::Connection) -> Result<Self, AdapterError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS rooms (
                room TEXT PRIMARY KEY,
                server_copy TEXT NOT NULL,
                save_count INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;
        Ok(Self {
            conn: std::sync::Arc::new(tokio::sync::Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl StorageAdapter for SqliteAdapter {
    async fn get_data(&self, room: &str, _user_id: &str) -> Result<Document, AdapterError> {
        let conn = self.conn.clone();
        let room = room.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let existing: Option<String> = conn
                .query_row(
                    "SELECT server_copy FROM rooms WHERE room = ?1",
                    [&room],
                    |row| row.get(0),
                )
                .ok();
            match existing {
                Some(raw) => serde_json::from_str(&raw).map_err(AdapterError::from),
                None => {
                    let seed = json!({});
                    conn.execute(
                        "INSERT INTO rooms (room, server_copy, save_count) VALUES (?1, ?2, 0)",
                        rusqlite::params![room, seed.to_string()],
                    )?;
                    Ok(seed)
                }
            }
        })
        .await
        .map_err(|e| AdapterError::Other(e.to_string()))?
    }

    async fn check_diffs(&self, _edit_message: &EditMessage, _room_state: &RoomState) -> Result<bool, AdapterError> {
        Ok(true)
    }

    async fn store_data(
        &self,
        room: &str,
        _user_id: &str,
        server_copy: &Document,
        _edits: &[crate::state::Edit],
    ) -> Result<(), AdapterError> {
        let conn = self.conn.clone();
        let room = room.to_string();
        let serialized = serde_json::to_string(server_copy)?;
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO rooms (room, server_copy, save_count) VALUES (?1, ?2, 1)
                 ON CONFLICT(room) DO UPDATE SET server_copy = ?2, save_count = save_count + 1",
                rusqlite::params![room, serialized],
            )
            .map(|_| ())
            .map_err(AdapterError::from)
        })
        .await
        .map_err(|e| AdapterError::Other(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::EditMessage;
    use serde_json::json;

    #[tokio::test]
    async fn in_memory_adapter_seeds_and_stores() {
        let adapter = InMemoryAdapter::new();
        let seeded = adapter.get_data("r", "u").await.unwrap();
        assert_eq!(seeded, json!({}));

        adapter
            .store_data("r", "u", &json!({"text": "hi"}), &[])
            .await
            .unwrap();
        assert_eq!(adapter.snapshot("r"), Some(json!({"text": "hi"})));
    }

    #[tokio::test]
    async fn in_memory_adapter_permits_all_edits() {
        let adapter = InMemoryAdapter::new();
        let room_state = RoomState::new(json!({}));
        let message = EditMessage {
            room: "r".to_string(),
            server_version: None,
            edits: vec![],
        };
        assert!(adapter.check_diffs(&message, &room_state).await.unwrap());
    }

    #[tokio::test]
    async fn sqlite_adapter_round_trips_server_copy() {
        let adapter = SqliteAdapter::open_in_memory().unwrap();
        let first = adapter.get_data("room-1", "u").await.unwrap();
        assert_eq!(first, json!({}));

        adapter
            .store_data("room-1", "u", &json!({"text": "saved"}), &[])
            .await
            .unwrap();

        let reloaded = adapter.get_data("room-1", "u").await.unwrap();
        assert_eq!(reloaded, json!({"text": "saved"}));
    }
}
