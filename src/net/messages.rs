//! Wire message shapes for the room-based JSON synchronization protocol.

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::state::{EditMessage, Reply};

/// Newline-delimited JSON frame exchanged between `TcpTransport` peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireMessage {
    /// Client asks to join a room.
    Join { room: String, user_id: String },
    /// Server hands the client its initial document after a join.
    Joined { room: String, document: Document },
    /// Client sends a batch of edits.
    Sync(EditMessage),
    /// Server replies to a sync.
    Reply(Reply),
    /// Server notifies the room that a remote update arrived, naming its origin
    /// connection so that connection's own client can ignore its own echo.
    RemoteUpdate { room: String, origin_connection_id: String },
    /// Transport-level error, e.g. "Need to re-connect!".
    Error { message: String },
    Disconnect,
    Ping,
    Pong,
}

/// Serializes `msg` as a single line of JSON terminated by `\n`.
pub fn serialize_message(msg: &WireMessage) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_string(msg)?;
    let mut bytes = json.into_bytes();
    bytes.push(b'\n');
    Ok(bytes)
}

/// Deserializes one line of JSON (trailing newline optional) into a `WireMessage`.
pub fn deserialize_message(line: &str) -> Result<WireMessage, serde_json::Error> {
    serde_json::from_str(line.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_serialize_and_deserialize() {
        let msg = WireMessage::Error {
            message: "Need to re-connect!".to_string(),
        };
        let bytes = serialize_message(&msg).unwrap();
        let line = String::from_utf8(bytes).unwrap();
        let parsed = deserialize_message(&line).unwrap();
        match parsed {
            WireMessage::Error { message } => assert_eq!(message, "Need to re-connect!"),
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
