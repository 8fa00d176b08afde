//! Server-side core of a differential synchronization service: keeps a canonical
//! JSON document per room consistent with many concurrently editing clients by
//! exchanging diffs, following the shadow/backup variant of differential
//! synchronization.
//!
//! The pipeline: a [`transport::Transport`]/[`transport::Connection`] pair feeds
//! `join`/`syncWithServer` events into [`router::SessionRouter`], which loads room
//! state through [`room::RoomStore`] (load-through, single-flight per room) and
//! delegates edit application to [`edit_processor::EditProcessor`]. That component
//! mutates [`state::ClientSyncState`]/[`state::RoomState`] via [`diff::DiffEngine`],
//! schedules persistence through [`save::SaveCoalescer`], and replies/broadcasts
//! through the transport. [`adapter::StorageAdapter`] is the injected
//! storage/authorization boundary.

pub mod adapter;
pub mod commands;
pub mod diff;
pub mod document;
pub mod edit_processor;
pub mod error;
pub mod net;
pub mod room;
pub mod router;
pub mod save;
pub mod state;
pub mod transport;

pub use adapter::{InMemoryAdapter, SqliteAdapter, StorageAdapter};
pub use diff::{ArrayOp, Delta, DiffEngine, ObjectDelta, PatchError, TextOp};
pub use document::Document;
pub use edit_processor::EditProcessor;
pub use error::{AdapterError, CoreError, CoreResult};
pub use net::{DeliveredEvent, InMemoryTransport};
pub use room::{RoomStore, RoomStoreConfig};
pub use router::SessionRouter;
pub use save::SaveCoalescer;
pub use state::{BackupState, ClientSyncState, Edit, EditMessage, Reply, RoomState, ShadowState};
pub use transport::{Connection, Transport};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

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

    /// End-to-end smoke test wiring every component together: join, edit, reply,
    /// and cross-client propagation to a second client.
    #[tokio::test]
    async fn two_clients_converge_on_a_single_edit() {
        let adapter = Arc::new(InMemoryAdapter::new());
        adapter.seed("r", json!({"text": "hello"}));
        let room_store = Arc::new(RoomStore::new(adapter.clone()));
        let transport = Arc::new(net::InMemoryTransport::new());
        let save_coalescer = Arc::new(SaveCoalescer::new(adapter.clone()));
        let edit_processor = Arc::new(EditProcessor::new(
            room_store.clone(),
            DiffEngine::new(),
            adapter.clone(),
            transport.clone(),
            save_coalescer,
        ));
        let router = SessionRouter::new(room_store.clone(), edit_processor, transport.clone());

        let alice = TestConnection {
            id: "alice".to_string(),
            user_id: "u1".to_string(),
        };
        let bob = TestConnection {
            id: "bob".to_string(),
            user_id: "u2".to_string(),
        };

        let alice_seed = router.join(&alice, "r").await.unwrap();
        let bob_seed = router.join(&bob, "r").await.unwrap();
        assert_eq!(alice_seed, json!({"text": "hello"}));
        assert_eq!(bob_seed, json!({"text": "hello"}));

        let engine = DiffEngine::new();
        let diff = engine.diff(&json!({"text": "hello"}), &json!({"text": "hello world"}));
        let msg = EditMessage {
            room: "r".to_string(),
            server_version: Some(0),
            edits: vec![Edit {
                server_version: 0,
                local_version: 0,
                diff,
            }],
        };
        router.sync_with_server(&alice, msg).await.unwrap();
        transport.drain("alice").await;

        // Bob syncs with an empty edit list; he should receive the server's diff.
        let bob_msg = EditMessage {
            room: "r".to_string(),
            server_version: Some(0),
            edits: vec![],
        };
        router.sync_with_server(&bob, bob_msg).await.unwrap();
        let delivered = transport.drain("bob").await;
        let reply = delivered
            .iter()
            .find_map(|e| match e {
                net::DeliveredEvent::Reply(r) => Some(r),
                _ => None,
            })
            .expect("bob should have received a reply");
        assert_eq!(reply.edits.len(), 1);
        assert_eq!(reply.edits[0].diff, engine.diff(&json!({"text": "hello"}), &json!({"text": "hello world"})));
    }
}
