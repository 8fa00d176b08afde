//! Data model for rooms and per-client synchronization bookkeeping.
//!
//! This module is pure data: construction from a seed document and the small
//! update helpers the shadow/backup algorithm needs. No I/O happens here; the
//! mutations described in the algorithm (room.rs, edit_processor.rs) are what
//! actually drives these types through their states.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::diff::{Delta, DiffEngine};
use crate::document::Document;

/// One step of change: the versions it was computed against, and the delta itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edit {
    pub server_version: u64,
    pub local_version: u64,
    pub diff: Delta,
}

/// An inbound batch of edits for a room, optionally carrying the client's view of
/// the server version so stale queued edits can be flushed (see `ClientSyncState::ack`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditMessage {
    pub room: String,
    pub server_version: Option<u64>,
    pub edits: Vec<Edit>,
}

/// The reply sent back to a client after processing an `EditMessage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub local_version: u64,
    pub server_version: u64,
    pub edits: Vec<Edit>,
}

/// The server's model of what a client has last acknowledged, used as the diff
/// base for outbound changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowState {
    pub doc: Document,
    pub server_version: u64,
    pub local_version: u64,
}

/// A one-step-back copy of the shadow, taken before applying an inbound edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupState {
    pub doc: Document,
    pub server_version: u64,
}

/// Per-(room, client) synchronization state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSyncState {
    pub shadow: ShadowState,
    pub backup: BackupState,
    pub edits: Vec<Edit>,
}

impl ClientSyncState {
    /// Seeds a new client's state from the room's current server copy, deep-copied
    /// into both the shadow and the backup.
    pub fn new(seed: &Document) -> Self {
        let doc = seed.clone();
        Self {
            shadow: ShadowState {
                doc: doc.clone(),
                server_version: 0,
                local_version: 0,
            },
            backup: BackupState {
                doc,
                server_version: 0,
            },
            edits: Vec::new(),
        }
    }

    /// If `server_version` matches the shadow's acknowledged server version, the
    /// client has caught up on everything queued so far and the queue is cleared.
    pub fn ack(&mut self, server_version: Option<u64>) {
        if server_version == Some(self.shadow.server_version) {
            self.edits.clear();
        }
    }

    /// True if `edit` applies cleanly against this client's current shadow versions.
    pub fn edit_matches_shadow(&self, edit: &Edit) -> bool {
        edit.server_version == self.shadow.server_version && edit.local_version == self.shadow.local_version
    }

    /// Applies one already-version-checked edit: backs up the shadow, then patches
    /// both the shadow and the room's server copy with the same delta.
    pub fn apply_edit(
        &mut self,
        engine: &DiffEngine,
        edit: &Edit,
        server_copy: &Document,
    ) -> Result<Document, crate::diff::PatchError> {
        self.backup = BackupState {
            doc: self.shadow.doc.clone(),
            server_version: self.shadow.server_version,
        };
        self.shadow.doc = engine.patch(&self.shadow.doc, &edit.diff)?;
        let patched_server_copy = engine.patch(server_copy, &edit.diff)?;
        if !edit.diff.is_empty() {
            self.shadow.local_version += 1;
        }
        Ok(patched_server_copy)
    }

    /// Computes the outbound diff against the current server copy, queues it if
    /// non-empty, and returns the reply to send back to the client regardless.
    pub fn send_server_changes(&mut self, engine: &DiffEngine, server_copy: &Document) -> Reply {
        let diff = engine.diff(&self.shadow.doc, server_copy);
        let based_on = self.shadow.server_version;

        if !diff.is_empty() {
            self.edits.push(Edit {
                server_version: based_on,
                local_version: self.shadow.local_version,
                diff: diff.clone(),
            });
            self.shadow.server_version += 1;
            // patch() never mutates `diff`, so the same delta already applied to
            // server_copy by the caller can be replayed here against the shadow.
            self.shadow.doc = engine
                .patch(&self.shadow.doc, &diff)
                .unwrap_or_else(|_| self.shadow.doc.clone());
        }

        Reply {
            local_version: self.shadow.local_version,
            server_version: based_on,
            edits: self.edits.clone(),
        }
    }
}

/// All server-side state for one room: the authoritative document, the
/// per-client bookkeeping, and the set of connections currently joined.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub server_copy: Document,
    pub clients: HashMap<String, ClientSyncState>,
    pub registered_sockets: HashSet<String>,
}

impl RoomState {
    pub fn new(server_copy: Document) -> Self {
        Self {
            server_copy,
            clients: HashMap::new(),
            registered_sockets: HashSet::new(),
        }
    }

    /// Registers a new client, seeding its state from the current server copy.
    pub fn join(&mut self, connection_id: &str) {
        let seed = self.server_copy.clone();
        self.clients
            .entry(connection_id.to_string())
            .or_insert_with(|| ClientSyncState::new(&seed));
        self.registered_sockets.insert(connection_id.to_string());
    }

    /// Removes a connection's client state and socket membership, if present.
    pub fn disconnect(&mut self, connection_id: &str) {
        self.clients.remove(connection_id);
        self.registered_sockets.remove(connection_id);
    }
}
