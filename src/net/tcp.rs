//! A minimal real transport: newline-delimited JSON over TCP, using the
//! room-based protocol in [`super::messages`].

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tracing::warn;

use super::messages::{serialize_message, WireMessage};
use crate::state::Reply;
use crate::transport::Transport;

/// TCP-backed transport. Each connection registers its write half via
/// [`TcpTransport::register`] once accepted; `bin/server.rs` drives the read
/// loop and calls into the core directly.
#[derive(Default)]
pub struct TcpTransport {
    writers: DashMap<String, Arc<Mutex<OwnedWriteHalf>>>,
    rooms: DashMap<String, Vec<String>>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly accepted connection's write half under `connection_id`.
    pub fn register(&self, connection_id: impl Into<String>, writer: OwnedWriteHalf) {
        self.writers.insert(connection_id.into(), Arc::new(Mutex::new(writer)));
    }

    /// Drops a connection's write half and removes it from every room.
    pub fn unregister(&self, connection_id: &str) {
        self.writers.remove(connection_id);
        for mut entry in self.rooms.iter_mut() {
            entry.retain(|id| id != connection_id);
        }
    }

    async fn send(&self, connection_id: &str, msg: &WireMessage) {
        let Some(writer) = self.writers.get(connection_id).map(|w| w.clone()) else {
            warn!(connection_id, "no writer registered for connection");
            return;
        };
        let bytes = match serialize_message(msg) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(connection_id, error = %err, "failed to serialize wire message");
                return;
            }
        };
        let mut guard = writer.lock().await;
        if let Err(err) = guard.write_all(&bytes).await {
            warn!(connection_id, error = %err, "failed to write to connection");
        }
    }

    fn members_of(&self, room: &str) -> Vec<String> {
        self.rooms.get(room).map(|entry| entry.clone()).unwrap_or_default()
    }

    /// Sends the `Joined` frame handed to a client right after `SessionRouter::join`
    /// returns its initial document. Not part of the `Transport` trait: it's a
    /// reply to the wire-level `Join` request, not a core sync event.
    pub async fn reply_joined(&self, connection_id: &str, room: String, document: crate::document::Document) {
        self.send(connection_id, &WireMessage::Joined { room, document }).await;
    }

    /// Answers a client's `Ping` keepalive frame.
    pub async fn send_pong(&self, connection_id: &str) {
        self.send(connection_id, &WireMessage::Pong).await;
    }
}

#[async_trait]
impl Transport for TcpTransport {
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
        self.send(
            connection_id,
            &WireMessage::Error {
                message: message.to_string(),
            },
        )
        .await;
    }

    async fn broadcast_remote_update(&self, room: &str, origin_connection_id: &str) {
        for member in self.members_of(room) {
            self.send(
                &member,
                &WireMessage::RemoteUpdate {
                    room: room.to_string(),
                    origin_connection_id: origin_connection_id.to_string(),
                },
            )
            .await;
        }
    }

    async fn reply(&self, connection_id: &str, reply: &Reply) {
        self.send(connection_id, &WireMessage::Reply(reply.clone())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn members_of_unknown_room_is_empty() {
        let transport = TcpTransport::new();
        assert!(transport.members_of("nope").is_empty());
    }
}
