//! Applies an inbound edit message to a room's shadow/server-copy state,
//! computes the reply diff, and fans out the side effects (save, broadcast).
//!
//! This is the component the rest of the core exists to support, so its single
//! public operation, [`EditProcessor::receive_edit`], is written as a linear
//! sequence rather than a callback pyramid: the per-room mutex guard is
//! acquired once, every shadow/server-copy mutation happens while it's held,
//! and the guard is dropped before the save/broadcast/reply I/O runs.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::adapter::StorageAdapter;
use crate::commands::NEED_RECONNECT;
use crate::diff::DiffEngine;
use crate::error::CoreError;
use crate::room::RoomStore;
use crate::save::SaveCoalescer;
use crate::state::{EditMessage, RoomState};
use crate::transport::{Connection, Transport};

/// Applies edits for a single room, owning no state of its own beyond its
/// collaborators: a room cache, a diff engine, a storage adapter, a transport,
/// and the save coalescer that persists the result.
pub struct EditProcessor {
    room_store: Arc<RoomStore>,
    diff_engine: DiffEngine,
    adapter: Arc<dyn StorageAdapter>,
    transport: Arc<dyn Transport>,
    save_coalescer: Arc<SaveCoalescer>,
}

impl EditProcessor {
    pub fn new(
        room_store: Arc<RoomStore>,
        diff_engine: DiffEngine,
        adapter: Arc<dyn StorageAdapter>,
        transport: Arc<dyn Transport>,
        save_coalescer: Arc<SaveCoalescer>,
    ) -> Self {
        Self {
            room_store,
            diff_engine,
            adapter,
            transport,
            save_coalescer,
        }
    }

    /// Processes one inbound `EditMessage` from `connection`.
    #[instrument(skip(self, connection, edit_message), fields(room = %edit_message.room, connection = connection.id()))]
    pub async fn receive_edit(&self, connection: &dyn Connection, edit_message: EditMessage) -> Result<(), CoreError> {
        let room_handle = self
            .room_store
            .get_data(&edit_message.room, connection.user_id())
            .await?;

        let reply = {
            let mut room = room_handle.lock().await;

            let allowed = self
                .adapter
                .check_diffs(&edit_message, &room)
                .await
                .map_err(CoreError::Adapter)?;
            if !allowed {
                return Ok(());
            }

            if !room.clients.contains_key(connection.id()) {
                drop(room);
                self.transport.emit_error(connection.id(), NEED_RECONNECT).await;
                return Ok(());
            }

            let RoomState { clients, server_copy, .. } = &mut *room;
            let client = clients
                .get_mut(connection.id())
                .expect("presence just checked above");

            client.ack(edit_message.server_version);

            for edit in &edit_message.edits {
                if client.edit_matches_shadow(edit) {
                    match client.apply_edit(&self.diff_engine, edit, server_copy) {
                        Ok(patched) => *server_copy = patched,
                        Err(err) => warn!(error = %err, "failed to apply edit to server copy"),
                    }
                } else {
                    debug!(
                        edit_server_version = edit.server_version,
                        edit_local_version = edit.local_version,
                        shadow_server_version = client.shadow.server_version,
                        shadow_local_version = client.shadow.local_version,
                        "dropping edit: version mismatch with shadow"
                    );
                }
            }

            client.send_server_changes(&self.diff_engine, server_copy)
        };

        self.save_coalescer
            .save_snapshot(
                &edit_message.room,
                self.room_store.clone(),
                edit_message.edits.clone(),
                connection.user_id(),
            )
            .await;

        if !edit_message.edits.is_empty() {
            self.transport
                .broadcast_remote_update(&edit_message.room, connection.id())
                .await;
        }

        self.transport.reply(connection.id(), &reply).await;

        Ok(())
    }
}
