//! In-memory cache of room state with load-through, single-flight loading.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, instrument};

use crate::adapter::StorageAdapter;
use crate::error::{AdapterError, CoreError};
use crate::state::RoomState;

/// Tuning knobs for [`RoomStore`], supplied at construction rather than read
/// from the environment.
#[derive(Debug, Clone, Copy)]
pub struct RoomStoreConfig {
    /// How often `reset` re-checks whether all save slots have drained.
    pub reset_poll_interval: Duration,
}

impl Default for RoomStoreConfig {
    fn default() -> Self {
        Self {
            reset_poll_interval: Duration::from_millis(50),
        }
    }
}

type RoomCell = Arc<OnceCell<Arc<Mutex<RoomState>>>>;

/// Process-wide cache of loaded rooms, keyed by room id.
///
/// At most one `adapter.get_data` call is in flight per room: concurrent callers
/// for the same unloaded room all await the same [`OnceCell`] and are notified
/// together when it resolves, and a load that errors leaves the cell empty so the
/// next caller retries instead of caching a permanent failure.
pub struct RoomStore {
    rooms: DashMap<String, RoomCell>,
    adapter: Arc<dyn StorageAdapter>,
    config: RoomStoreConfig,
}

impl RoomStore {
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self::with_config(adapter, RoomStoreConfig::default())
    }

    pub fn with_config(adapter: Arc<dyn StorageAdapter>, config: RoomStoreConfig) -> Self {
        Self {
            rooms: DashMap::new(),
            adapter,
            config,
        }
    }

    /// Returns the cached room, loading it via the adapter on first miss.
    #[instrument(skip(self), fields(room = %room))]
    pub async fn get_data(&self, room: &str, user_id: &str) -> Result<Arc<Mutex<RoomState>>, CoreError> {
        let cell = self
            .rooms
            .entry(room.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let adapter = self.adapter.clone();
        let room_owned = room.to_string();
        let user_id_owned = user_id.to_string();

        let room_state = cell
            .get_or_try_init(|| async move {
                let seed = adapter.get_data(&room_owned, &user_id_owned).await?;
                info!(room = %room_owned, "loaded room");
                Ok::<_, AdapterError>(Arc::new(Mutex::new(RoomState::new(seed))))
            })
            .await
            .map_err(CoreError::Adapter)?;

        Ok(room_state.clone())
    }

    /// Returns the cached room handle without triggering a load, or `None` if the
    /// room was never loaded (or isn't finished loading yet). Used by `SessionRouter`
    /// on disconnect, which must tolerate rooms it never touched.
    pub fn peek(&self, room: &str) -> Option<Arc<Mutex<RoomState>>> {
        self.rooms.get(room).and_then(|cell| cell.get().cloned())
    }

    /// Clears all cached rooms once no save is in progress for any of them.
    ///
    /// Blocks (poll-based, at `config.reset_poll_interval`) until the given
    /// coalescer reports every room idle, then drops all in-memory room state.
    pub async fn reset(&self, coalescer: &crate::save::SaveCoalescer) {
        loop {
            if coalescer.is_idle_all() {
                break;
            }
            tokio::time::sleep(self.config.reset_poll_interval).await;
        }
        coalescer.clear();
        self.rooms.clear();
    }

    /// Number of rooms currently cached (loaded or loading). Test/introspection helper.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::InMemoryAdapter;
    use crate::save::SaveCoalescer;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn get_data_loads_once_and_caches() {
        let adapter = Arc::new(InMemoryAdapter::new());
        adapter.seed("r", json!({"text": "hi"}));
        let store = RoomStore::new(adapter);

        let a = store.get_data("r", "u1").await.unwrap();
        let b = store.get_data("r", "u2").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.lock().await.server_copy, json!({"text": "hi"}));
    }

    #[tokio::test]
    async fn concurrent_loads_dedupe_to_one_adapter_call() {
        #[derive(Default)]
        struct CountingAdapter {
            calls: AtomicUsize,
        }

        #[async_trait::async_trait]
        impl StorageAdapter for CountingAdapter {
            async fn get_data(&self, _room: &str, _user_id: &str) -> Result<crate::document::Document, AdapterError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(json!({"loaded": true}))
            }
            async fn check_diffs(
                &self,
                _edit_message: &crate::state::EditMessage,
                _room_state: &RoomState,
            ) -> Result<bool, AdapterError> {
                Ok(true)
            }
            async fn store_data(
                &self,
                _room: &str,
                _user_id: &str,
                _server_copy: &crate::document::Document,
                _edits: &[crate::state::Edit],
            ) -> Result<(), AdapterError> {
                Ok(())
            }
        }

        let adapter = Arc::new(CountingAdapter::default());
        let store = Arc::new(RoomStore::new(adapter.clone()));

        let s1 = store.clone();
        let s2 = store.clone();
        let (a, b) = tokio::join!(
            tokio::spawn(async move { s1.get_data("new-room", "u1").await.unwrap() }),
            tokio::spawn(async move { s2.get_data("new-room", "u2").await.unwrap() }),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reset_waits_for_idle_then_clears() {
        let adapter = Arc::new(InMemoryAdapter::new());
        let store = RoomStore::with_config(
            adapter.clone(),
            RoomStoreConfig {
                reset_poll_interval: Duration::from_millis(5),
            },
        );
        store.get_data("r", "u").await.unwrap();
        assert_eq!(store.len(), 1);

        let coalescer = SaveCoalescer::new(adapter);
        let store = Arc::new(store);
        coalescer.save_snapshot("r", store.clone(), Vec::new(), "u").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(coalescer.tracked_rooms(), 1);

        store.reset(&coalescer).await;
        assert!(store.is_empty());
        assert_eq!(coalescer.tracked_rooms(), 0);
    }
}
