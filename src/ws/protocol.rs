//! JSON wire protocol between editing sessions and the relay.
//!
//! Every frame is a flat JSON object with a mandatory `type` field. Unknown
//! types are logged and dropped; malformed JSON drops the single frame and
//! leaves the connection open.

use crate::content::ContentPath;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A decoded relay message.
///
/// `client_id` is the origin session's relay-assigned identifier, so
/// receivers can tell their own echo from a peer's edit. The relay does not
/// deduplicate on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncMessage {
    /// Server-to-client handshake, sent once per connection.
    Connection { client_id: u64 },
    ContentUpdate {
        path: ContentPath,
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<u64>,
        timestamp: i64,
    },
    ImageUpload {
        path: ContentPath,
        image_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<u64>,
        timestamp: i64,
    },
    AdminLogin {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<u64>,
    },
    AdminStatus {
        is_admin: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<u64>,
    },
    GalleryUpdate {
        action: String,
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<u64>,
    },
    Ping,
    Pong,
    ClientJoined { total_clients: usize },
    ClientLeft { total_clients: usize },
}

/// Protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("malformed message: {0}")]
    Malformed(String),
}

const KNOWN_TYPES: &[&str] = &[
    "connection",
    "content_update",
    "image_upload",
    "admin_login",
    "admin_status",
    "gallery_update",
    "ping",
    "pong",
    "client_joined",
    "client_left",
];

/// Encode a message as a JSON text frame.
pub fn encode(msg: &SyncMessage) -> String {
    serde_json::to_string(msg).expect("SyncMessage serializes to JSON")
}

/// Decode a JSON text frame.
///
/// Distinguishes unknown `type` values (ignored per protocol) from
/// malformed frames (also dropped, but worth a louder log line).
pub fn decode(text: &str) -> Result<SyncMessage, ProtocolError> {
    match serde_json::from_str::<SyncMessage>(text) {
        Ok(msg) => Ok(msg),
        Err(typed_err) => {
            let value: Value = serde_json::from_str(text)
                .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
            match value.get("type").and_then(Value::as_str) {
                Some(kind) if !KNOWN_TYPES.contains(&kind) => {
                    Err(ProtocolError::UnknownType(kind.to_string()))
                }
                _ => Err(ProtocolError::Malformed(typed_err.to_string())),
            }
        }
    }
}
