//! Wires transport-level `join`/`syncWithServer`/disconnect events to the
//! room cache and the edit processor, and bootstraps newly joined clients.

use std::sync::Arc;

use tracing::info;

use crate::document::Document;
use crate::edit_processor::EditProcessor;
use crate::error::CoreError;
use crate::room::RoomStore;
use crate::state::EditMessage;
use crate::transport::{Connection, Transport};

/// Entry point a transport implementation calls into on `join`, `syncWithServer`,
/// and disconnect. Holds no per-connection state itself; everything durable lives
/// in the `RoomState` the room store caches.
pub struct SessionRouter {
    room_store: Arc<RoomStore>,
    edit_processor: Arc<EditProcessor>,
    transport: Arc<dyn Transport>,
}

impl SessionRouter {
    pub fn new(room_store: Arc<RoomStore>, edit_processor: Arc<EditProcessor>, transport: Arc<dyn Transport>) -> Self {
        Self {
            room_store,
            edit_processor,
            transport,
        }
    }

    /// Handles `join(room, initCb)`: loads the room, seeds a fresh `ClientSyncState`
    /// from the current server copy, registers the connection's socket membership,
    /// and returns the document the caller should hand to `initCb`.
    pub async fn join(&self, connection: &dyn Connection, room: &str) -> Result<Document, CoreError> {
        let room_handle = self.room_store.get_data(room, connection.user_id()).await?;

        let seed = {
            let mut room_state = room_handle.lock().await;
            room_state.join(connection.id());
            room_state.server_copy.clone()
        };

        self.transport.join_room(connection.id(), room).await;
        info!(room, connection = connection.id(), "client joined room");

        Ok(seed)
    }

    /// Handles `syncWithServer(editMessage, replyFn)` by delegating to the edit processor.
    pub async fn sync_with_server(&self, connection: &dyn Connection, edit_message: EditMessage) -> Result<(), CoreError> {
        self.edit_processor.receive_edit(connection, edit_message).await
    }

    /// Handles a transport disconnect: removes the connection's `ClientSyncState`
    /// and socket membership from `room` if it was ever loaded. Tolerates rooms
    /// this connection never actually joined (or that were never loaded at all).
    pub async fn disconnect(&self, connection: &dyn Connection, room: &str) {
        if let Some(room_handle) = self.room_store.peek(room) {
            let mut room_state = room_handle.lock().await;
            room_state.disconnect(connection.id());
        }
        self.transport.leave_room(connection.id(), room).await;
        info!(room, connection = connection.id(), "client disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::InMemoryAdapter;
    use crate::diff::DiffEngine;
    use crate::net::InMemoryTransport;
    use crate::save::SaveCoalescer;
    use serde_json::json;

    struct TestConnection {
        id: String,
        user_id: String,
    }

    impl Connection for TestConnection {
        fn id(&self) -> &str {
            &self.id
        }
        fn user_id(&self) -> &str {
            &self.user_id
        }
    }

    fn router() -> (Arc<RoomStore>, SessionRouter, Arc<InMemoryAdapter>) {
        let adapter = Arc::new(InMemoryAdapter::new());
        let room_store = Arc::new(RoomStore::new(adapter.clone()));
        let transport = Arc::new(InMemoryTransport::new());
        let save_coalescer = Arc::new(SaveCoalescer::new(adapter.clone()));
        let edit_processor = Arc::new(EditProcessor::new(
            room_store.clone(),
            DiffEngine::new(),
            adapter.clone(),
            transport.clone(),
            save_coalescer,
        ));
        (room_store.clone(), SessionRouter::new(room_store, edit_processor, transport), adapter)
    }

    #[tokio::test]
    async fn join_seeds_client_state_from_server_copy() {
        let (room_store, router, adapter) = router();
        adapter.seed("r", json!({"text": "hello"}));

        let conn = TestConnection {
            id: "c1".to_string(),
            user_id: "u".to_string(),
        };
        let seed = router.join(&conn, "r").await.unwrap();
        assert_eq!(seed, json!({"text": "hello"}));

        let room_handle = room_store.get_data("r", "u").await.unwrap();
        let room_state = room_handle.lock().await;
        let client = room_state.clients.get("c1").unwrap();
        assert_eq!(client.shadow.doc, json!({"text": "hello"}));
        assert_eq!(client.backup.doc, json!({"text": "hello"}));
        assert_eq!(client.shadow.server_version, 0);
        assert_eq!(client.shadow.local_version, 0);
        assert!(client.edits.is_empty());
        assert!(room_state.registered_sockets.contains("c1"));
    }

    #[tokio::test]
    async fn disconnect_removes_client_state_and_tolerates_unloaded_rooms() {
        let (room_store, router, _adapter) = router();
        let conn = TestConnection {
            id: "c1".to_string(),
            user_id: "u".to_string(),
        };
        router.join(&conn, "r").await.unwrap();

        router.disconnect(&conn, "r").await;
        let room_handle = room_store.get_data("r", "u").await.unwrap();
        assert!(!room_handle.lock().await.clients.contains_key("c1"));

        // Disconnecting from a room never loaded must not panic or load it.
        router.disconnect(&conn, "never-loaded").await;
        assert!(room_store.peek("never-loaded").is_none());
    }
}
