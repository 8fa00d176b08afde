//! Per-room single-flight snapshot persistence.
//!
//! At most one `adapter.store_data` call is in flight per room. Saves requested
//! while one is already running collapse into exactly one follow-up save, which
//! re-reads the room's latest server copy rather than replaying the parameters
//! that triggered it.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use crate::adapter::StorageAdapter;
use crate::room::RoomStore;
use crate::state::Edit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SaveState {
    Idle,
    Saving,
    SavingQueued,
}

struct RoomSaveSlot {
    state: AsyncMutex<SaveState>,
    queued_edits: AsyncMutex<Vec<Edit>>,
}

impl RoomSaveSlot {
    fn new() -> Self {
        Self {
            state: AsyncMutex::new(SaveState::Idle),
            queued_edits: AsyncMutex::new(Vec::new()),
        }
    }
}

/// Coalescing snapshot persister, process-wide, keyed by room.
pub struct SaveCoalescer {
    adapter: Arc<dyn StorageAdapter>,
    slots: DashMap<String, Arc<RoomSaveSlot>>,
}

impl SaveCoalescer {
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self {
            adapter,
            slots: DashMap::new(),
        }
    }

    fn slot_for(&self, room: &str) -> Arc<RoomSaveSlot> {
        self.slots
            .entry(room.to_string())
            .or_insert_with(|| Arc::new(RoomSaveSlot::new()))
            .clone()
    }

    /// Requests a snapshot save for `room`. Returns once the request has been
    /// either dispatched or queued; does not wait for the save itself to finish.
    pub async fn save_snapshot(
        &self,
        room: &str,
        room_store: Arc<RoomStore>,
        edits: Vec<Edit>,
        user_id: &str,
    ) {
        let slot = self.slot_for(room);
        let mut state = slot.state.lock().await;

        match *state {
            SaveState::Idle => {
                *state = SaveState::Saving;
                drop(state);
                self.spawn_save(room.to_string(), room_store, edits, user_id.to_string(), slot);
            }
            SaveState::Saving => {
                *state = SaveState::SavingQueued;
                drop(state);
                let mut queued = slot.queued_edits.lock().await;
                *queued = edits;
            }
            SaveState::SavingQueued => {
                drop(state);
                let mut queued = slot.queued_edits.lock().await;
                *queued = edits;
            }
        }
    }

    fn spawn_save(
        &self,
        room: String,
        room_store: Arc<RoomStore>,
        edits: Vec<Edit>,
        user_id: String,
        slot: Arc<RoomSaveSlot>,
    ) {
        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            let mut current_edits = edits;
            loop {
                let room_handle = match room_store.get_data(&room, &user_id).await {
                    Ok(handle) => handle,
                    Err(err) => {
                        warn!(room = %room, error = %err, "save coalescer could not reload room to save");
                        *slot.state.lock().await = SaveState::Idle;
                        break;
                    }
                };
                let server_copy = room_handle.lock().await.server_copy.clone();

                if let Err(err) = adapter
                    .store_data(&room, &user_id, &server_copy, &current_edits)
                    .await
                {
                    warn!(room = %room, error = %err, "store_data failed");
                }

                let mut state = slot.state.lock().await;
                match *state {
                    SaveState::SavingQueued => {
                        *state = SaveState::Saving;
                        drop(state);
                        let mut queued = slot.queued_edits.lock().await;
                        current_edits = std::mem::take(&mut *queued);
                        continue;
                    }
                    _ => {
                        *state = SaveState::Idle;
                        break;
                    }
                }
            }
        });
    }

    /// True if no room has a save in flight. Used by `RoomStore::reset`.
    pub fn is_idle_all(&self) -> bool {
        self.slots.iter().all(|entry| {
            entry
                .value()
                .state
                .try_lock()
                .map(|state| *state == SaveState::Idle)
                .unwrap_or(false)
        })
    }

    /// Drops all per-room save bookkeeping. Only safe to call once `is_idle_all`
    /// holds; callers coordinate this (see `RoomStore::reset`).
    pub fn clear(&self) {
        self.slots.clear();
    }

    /// Number of rooms with a save slot allocated (idle or not). Test/introspection helper.
    pub fn tracked_rooms(&self) -> usize {
        self.slots.len()
    }
}

impl std::fmt::Debug for SaveCoalescer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveCoalescer")
            .field("rooms_tracked", &self.tracked_rooms())
            .finish()
    }
}
