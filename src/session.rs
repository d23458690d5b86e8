use crate::types::{ConnId, PlayerId, RoomId};

/// Lifecycle of one connection:
///
/// ```text
///   Unjoined ──(join)──→ Joined ──(close)──→ Closed
///                         │  ↑
///                         └──┘ (join again = room switch)
/// ```
///
/// Closed is terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Unjoined,
    Joined { room: RoomId, player: PlayerId },
    Closed,
}

/// The server's record of one live connection.
///
/// Owned by the connection task and passed to every dispatcher call.
/// This is the authoritative copy of the connection's room/player
/// identity; the Room's member entry is denormalized from it and must
/// stay consistent.
#[derive(Debug)]
pub struct Session {
    conn: ConnId,
    state: SessionState,
}

impl Session {
    pub fn new(conn: ConnId) -> Self {
        Self {
            conn,
            state: SessionState::Unjoined,
        }
    }

    pub fn conn(&self) -> ConnId {
        self.conn
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_joined(&self) -> bool {
        matches!(self.state, SessionState::Joined { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, SessionState::Closed)
    }

    /// Current membership, if joined.
    pub fn membership(&self) -> Option<(&RoomId, &PlayerId)> {
        match &self.state {
            SessionState::Joined { room, player } => Some((room, player)),
            _ => None,
        }
    }

    /// Transition into a room. Returns the previous membership when this
    /// is a room switch, so the caller can clean up the old room.
    /// A closed session stays closed.
    pub fn join(&mut self, room: RoomId, player: PlayerId) -> Option<(RoomId, PlayerId)> {
        if self.is_closed() {
            return None;
        }
        match std::mem::replace(&mut self.state, SessionState::Joined { room, player }) {
            SessionState::Joined { room, player } => Some((room, player)),
            _ => None,
        }
    }

    /// Terminal transition. Returns the membership to clean up; closing
    /// an unjoined or already-closed session yields nothing.
    pub fn close(&mut self) -> Option<(RoomId, PlayerId)> {
        match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Joined { room, player } => Some((room, player)),
            _ => None,
        }
    }
}
