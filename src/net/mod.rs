//! Reference transport implementations.
//!
//! `InMemoryTransport` is used by tests, property tests, and `bin/demo.rs`.
//! `TcpTransport` (see `net::tcp`) is a minimal newline-delimited-JSON transport.

pub mod messages;
pub mod tcp;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::state::Reply;
use crate::transport::Transport;

/// Anything an `InMemoryTransport` delivers to a connection, captured for
/// assertions instead of written to a socket.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveredEvent {
    Error(String),
    RemoteUpdate { origin_connection_id: String },
    Reply(Reply),
}

/// Trivial in-process transport: `reply`/`emit_error`/`broadcast_remote_update`
/// append to a per-connection inbox instead of touching a socket.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    rooms: DashMap<String, Vec<String>>,
    inboxes: DashMap<String, Arc<Mutex<Vec<DeliveredEvent>>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn inbox(&self, connection_id: &str) -> Arc<Mutex<Vec<DeliveredEvent>>> {
        self.inboxes
            .entry(connection_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }

    /// Drains and returns everything delivered to `connection_id` so far.
    pub async fn drain(&self, connection_id: &str) -> Vec<DeliveredEvent> {
        let inbox = self.inbox(connection_id);
        let mut guard = inbox.lock().await;
        std::mem::take(&mut *guard)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn join_room(&self, connection_id: &str, room: &str) {
        let mut members = self.rooms.entry(room.to_string()).or_insert_with(Vec::new);
        if !members.iter().any(|id| id == connection_id) {
            members.push(connection_id.to_string());
        }
    }

    async fn leave_room(&self, connection_id: &str, room: &str) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.retain(|id| id != connection_id);
        }
    }

    async fn emit_error(&self, connection_id: &str, message: &str) {
        let inbox = self.inbox(connection_id);
        inbox.lock().await.push(DeliveredEvent::Error(message.to_string()));
    }

    async fn broadcast_remote_update(&self, room: &str, origin_connection_id: &str) {
        let members = self
            .rooms
            .get(room)
            .map(|entry| entry.clone())
            .unwrap_or_default();
        for member in members {
            let inbox = self.inbox(&member);
            inbox.lock().await.push(DeliveredEvent::RemoteUpdate {
                origin_connection_id: origin_connection_id.to_string(),
            });
        }
    }

    async fn reply(&self, connection_id: &str, reply: &Reply) {
        let inbox = self.inbox(connection_id);
        inbox.lock().await.push(DeliveredEvent::Reply(reply.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_only_room_members() {
        let transport = InMemoryTransport::new();
        transport.join_room("a", "r1").await;
        transport.join_room("b", "r1").await;
        transport.join_room("c", "r2").await;

        transport.broadcast_remote_update("r1", "a").await;

        assert_eq!(transport.drain("a").await.len(), 1);
        assert_eq!(transport.drain("b").await.len(), 1);
        assert!(transport.drain("c").await.is_empty());
    }

    #[tokio::test]
    async fn leave_room_stops_future_broadcasts() {
        let transport = InMemoryTransport::new();
        transport.join_room("a", "r1").await;
        transport.leave_room("a", "r1").await;
        transport.broadcast_remote_update("r1", "a").await;
        assert!(transport.drain("a").await.is_empty());
    }
}
