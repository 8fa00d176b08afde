//! Wire event identifiers shared between the core and a transport implementation.
//!
//! These are part of the public protocol contract: a transport binds its own
//! framing to these names, but the strings themselves are fixed.

/// Inbound: client asks to join a room.
pub const JOIN: &str = "join";
/// Inbound: client sends a batch of edits.
pub const SYNC_WITH_SERVER: &str = "syncWithServer";
/// Outbound: transport-level error delivered to a single connection.
pub const ERROR: &str = "error";
/// Outbound: broadcast to every connection in a room after an edit lands.
pub const REMOTE_UPDATE_INCOMING: &str = "remoteUpdateIncoming";

/// Message sent to a client whose session state has been purged.
pub const NEED_RECONNECT: &str = "Need to re-connect!";
