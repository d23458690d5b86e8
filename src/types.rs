use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Utf8Bytes;

/// Relay errors
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("room not found: {0}")]
    RoomNotFound(RoomId),

    #[error("internal error: {0}")]
    Internal(String),
}

const CONN_ID_LEN: usize = 13;
const HEX_CHARS: &[u8] = b"0123456789abcdef";

/// Room name: client-chosen opaque string, unique per registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Player name: client-chosen opaque string, unique within one room
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for PlayerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Connection ID: 13-byte fixed array ("conn_" + 8 hex), server-generated
/// at accept time. Distinguishes a superseded connection from its
/// replacement when the same player rejoins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId {
    bytes: [u8; CONN_ID_LEN],
}

impl ConnId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; CONN_ID_LEN];
        bytes[..5].copy_from_slice(b"conn_");

        let mut rng = rand::rng();
        let value: u32 = rng.random();

        for i in 0..8 {
            let nibble = ((value >> (28 - i * 4)) & 0xF) as usize;
            bytes[5 + i] = HEX_CHARS[nibble];
        }
        Self { bytes }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).unwrap_or("")
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wrapper for outbound WebSocket messages using tungstenite's Utf8Bytes.
#[derive(Debug, Clone)]
pub struct OutboundMessage(Utf8Bytes);

impl OutboundMessage {
    /// Create a new outbound message from any string type
    pub fn new(s: impl Into<Utf8Bytes>) -> Self {
        Self(s.into())
    }

    /// Get the inner Utf8Bytes for tungstenite Message::Text
    pub fn into_inner(self) -> Utf8Bytes {
        self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<String> for OutboundMessage {
    fn from(s: String) -> Self {
        Self(Utf8Bytes::from(s))
    }
}

/// Channel for outbound messages to one client.
/// Uses OutboundMessage for O(1) broadcast cloning.
pub type ClientSender = mpsc::UnboundedSender<OutboundMessage>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conn_id_generate_has_correct_format() {
        let conn = ConnId::generate();
        assert!(conn.as_str().starts_with("conn_"));
        assert_eq!(conn.as_str().len(), 13);
    }

    #[test]
    fn conn_id_generate_uses_valid_hex() {
        let conn = ConnId::generate();
        for c in conn.as_str()[5..].chars() {
            assert!(c.is_ascii_hexdigit(), "Invalid char: {}", c);
        }
    }

    #[test]
    fn room_id_display() {
        let room = RoomId::from("r1");
        assert_eq!(format!("{}", room), "r1");
    }

    #[test]
    fn player_id_display() {
        let player = PlayerId::from("alice");
        assert_eq!(format!("{}", player), "alice");
    }

    #[test]
    fn room_id_serialization() {
        let room = RoomId::from("r1");
        let json = serde_json::to_string(&room).unwrap();
        assert_eq!(json, "\"r1\"");
    }

    #[test]
    fn player_id_deserialization() {
        let player: PlayerId = serde_json::from_str("\"alice\"").unwrap();
        assert_eq!(player.as_str(), "alice");
    }

    #[test]
    fn room_id_preserves_arbitrary_names() {
        // Room names are client-chosen and not length-limited.
        let room = RoomId::from("a-rather-long-room-name-with-unicode-ñ");
        assert_eq!(room.as_str(), "a-rather-long-room-name-with-unicode-ñ");
    }

    #[test]
    fn conn_id_is_copy() {
        let conn = ConnId::generate();
        let copy = conn;
        assert_eq!(conn.as_str(), copy.as_str());
    }
}
