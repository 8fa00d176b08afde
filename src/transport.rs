//! The connection/broadcast boundary injected into the synchronization core.

use async_trait::async_trait;

use crate::state::Reply;

/// One connected client, as the core sees it.
pub trait Connection: Send + Sync {
    fn id(&self) -> &str;
    fn user_id(&self) -> &str;
}

/// Outbound operations the core needs from the transport layer. The
/// authoritative membership record is `RoomState::registered_sockets`;
/// `join_room`/`leave_room` exist only so a transport implementation knows
/// which physical connections to fan a broadcast out to.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Records that `connection_id` is now part of `room`, for broadcast delivery.
    async fn join_room(&self, connection_id: &str, room: &str);

    /// Records that `connection_id` has left `room`.
    async fn leave_room(&self, connection_id: &str, room: &str);

    /// Sends a transport-level error to a single connection (e.g. "Need to re-connect!").
    async fn emit_error(&self, connection_id: &str, message: &str);

    /// Broadcasts `remoteUpdateIncoming(origin_connection_id)` to every connection
    /// joined to `room`, including the origin; callers that must exclude the
    /// origin filter it out on the receiving side.
    async fn broadcast_remote_update(&self, room: &str, origin_connection_id: &str);

    /// Sends a sync reply to a single connection.
    async fn reply(&self, connection_id: &str, reply: &Reply);
}
