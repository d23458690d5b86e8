use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{OutboundMessage, PlayerId, RoomId};

/// Messages sent from client to server.
///
/// Parsed in two stages (JSON value first, then shape checks) because the
/// `update` payload is opaque: every field beyond `type` is passed through
/// to the rest of the room verbatim, so there is no closed set of fields
/// a derive could bind to.
#[derive(Debug)]
pub enum Inbound {
    /// Join a room, or switch rooms if already joined
    Join { room: RoomId, player: PlayerId },

    /// State update to fan out to the sender's room
    Update { fields: Map<String, Value> },

    /// Unrecognized `type`: ignored, reserved for future message kinds
    Unknown,
}

/// Why a text frame could not be turned into an [`Inbound`] envelope.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    /// Not JSON, not an object, or no string `type` field.
    /// Discarded without a reply.
    #[error("invalid message")]
    Malformed,

    /// A `join` without a usable `room` or `player`.
    /// The sender gets an error reply and no state changes.
    #[error("join requires a {0} field")]
    MissingField(&'static str),
}

/// Parses one inbound text frame.
pub fn parse_inbound(text: &str) -> Result<Inbound, ParseError> {
    let value: Value = serde_json::from_str(text).map_err(|_| ParseError::Malformed)?;
    let Value::Object(mut fields) = value else {
        return Err(ParseError::Malformed);
    };

    let msg_type = match fields.get("type") {
        Some(Value::String(t)) => t.clone(),
        _ => return Err(ParseError::Malformed),
    };

    match msg_type.as_str() {
        "join" => {
            let room = string_field(&fields, "room").ok_or(ParseError::MissingField("room"))?;
            let player =
                string_field(&fields, "player").ok_or(ParseError::MissingField("player"))?;
            Ok(Inbound::Join {
                room: RoomId::from(room),
                player: PlayerId::from(player),
            })
        }
        "update" => {
            fields.remove("type");
            Ok(Inbound::Update { fields })
        }
        _ => Ok(Inbound::Unknown),
    }
}

fn string_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Messages sent from server to client
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Join confirmed, echoes the room
    #[serde(rename = "joined")]
    Joined { room: RoomId },

    /// Another player entered the room
    #[serde(rename = "player_joined")]
    PlayerJoined { player: PlayerId },

    /// A player left the room (disconnect or room switch)
    #[serde(rename = "player_left")]
    PlayerLeft { player: PlayerId },

    /// Error response
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerMessage {
    /// Serializes once, for fan-out or a single reply.
    pub fn to_outbound(&self) -> OutboundMessage {
        let json = serde_json::to_string(self)
            .expect("ServerMessage serialization should never fail");
        OutboundMessage::from(json)
    }
}

/// Builds the broadcast form of an `update`.
///
/// The sender's identity is stamped over whatever the client put in
/// `player` (clients are not trusted to self-report identity); every
/// other field passes through verbatim.
pub fn update_envelope(player: &PlayerId, mut fields: Map<String, Value>) -> OutboundMessage {
    fields.insert("type".to_owned(), Value::String("update".to_owned()));
    fields.insert(
        "player".to_owned(),
        Value::String(player.as_str().to_owned()),
    );
    let json = serde_json::to_string(&Value::Object(fields))
        .expect("update envelope serialization should never fail");
    OutboundMessage::from(json)
}

/// Snapshot of all active rooms, shaped for the introspection surface.
#[derive(Debug, Serialize)]
pub struct RoomsSnapshot {
    pub rooms: Vec<RoomSummary>,
}

#[derive(Debug, Serialize)]
pub struct RoomSummary {
    pub room: RoomId,
    pub players: usize,
    #[serde(rename = "playerNames")]
    pub player_names: Vec<PlayerId>,
}

/// Snapshot of one room's membership.
#[derive(Debug, Serialize)]
pub struct RoomSnapshot {
    pub room: RoomId,
    pub players: Vec<PlayerId>,
}
