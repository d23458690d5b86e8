use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::messages::{RoomSnapshot, RoomSummary, RoomsSnapshot};
use crate::types::{ClientSender, ConnId, OutboundMessage, PlayerId, RoomId};

/// One player's live association with a room.
#[derive(Debug)]
pub struct Member {
    pub conn: ConnId,
    pub tx: ClientSender,
    pub last_activity: Instant,
}

/// An isolated broadcast domain. Members only see messages from co-members.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    members: HashMap<PlayerId, Member>,
}

impl Room {
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, player: &PlayerId) -> bool {
        self.members.contains_key(player)
    }

    /// Best-effort fan-out of one pre-serialized message.
    ///
    /// Attempts a non-blocking send to every member except `exclude`.
    /// A closed or broken channel is logged and skipped; the dead member
    /// is reconciled later by close handling or the sweeper, never here.
    pub fn broadcast(&self, msg: &OutboundMessage, exclude: Option<&PlayerId>) {
        for (player, member) in &self.members {
            if Some(player) == exclude {
                continue;
            }
            if member.tx.is_closed() {
                debug!("Skipping {} in {}: channel closed", player, self.id);
                continue;
            }
            if member.tx.send(msg.clone()).is_err() {
                warn!(
                    "Send to {} in {} failed, leaving member for cleanup",
                    player, self.id
                );
            }
        }
    }
}

/// Result of refreshing a member's activity timestamp.
#[derive(Debug, PartialEq)]
pub enum TouchOutcome {
    /// Timestamp refreshed.
    Refreshed,
    /// No member under that name (e.g. evicted by the sweeper).
    Missing,
    /// The name is now held by a different connection.
    Superseded,
}

/// All active rooms, keyed by room name.
///
/// Not thread-safe by itself: one instance is owned by the relay actor
/// task, which serializes every mutation (see `actor.rs`). Keeping the
/// state a plain struct lets tests drive the full membership lifecycle
/// without a runtime or transport.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomId, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, room: &RoomId) -> Option<&Room> {
        self.rooms.get(room)
    }

    /// Returns the room, creating it empty on first reference.
    pub fn get_or_create(&mut self, room: &RoomId) -> &mut Room {
        self.rooms.entry(room.clone()).or_insert_with(|| {
            info!("Room created: {}", room);
            Room {
                id: room.clone(),
                members: HashMap::new(),
            }
        })
    }

    /// Removes the room iff it has no members. Must follow every member
    /// removal so empty rooms never outlive the operation that emptied
    /// them.
    pub fn remove_if_empty(&mut self, room: &RoomId) {
        if self.rooms.get(room).is_some_and(Room::is_empty) {
            self.rooms.remove(room);
            info!("Room {} removed (empty)", room);
        }
    }

    /// Adds a member, creating the room if needed. Returns the replaced
    /// member when the player name was already taken (rejoin from a new
    /// connection supersedes the old one without closing its transport).
    pub fn insert_member(
        &mut self,
        room: &RoomId,
        player: PlayerId,
        conn: ConnId,
        tx: ClientSender,
        now: Instant,
    ) -> Option<Member> {
        let room = self.get_or_create(room);
        room.members.insert(
            player,
            Member {
                conn,
                tx,
                last_activity: now,
            },
        )
    }

    /// Removes a member iff it still belongs to `conn`. A stale removal
    /// from a superseded connection is a no-op. The caller must follow
    /// with [`remove_if_empty`](Self::remove_if_empty).
    pub fn remove_member(&mut self, room: &RoomId, player: &PlayerId, conn: ConnId) -> bool {
        let Some(entry) = self.rooms.get_mut(room) else {
            return false;
        };
        match entry.members.get(player) {
            Some(member) if member.conn == conn => {
                entry.members.remove(player);
                true
            }
            _ => false,
        }
    }

    /// Refreshes a member's activity timestamp.
    pub fn touch(
        &mut self,
        room: &RoomId,
        player: &PlayerId,
        conn: ConnId,
        now: Instant,
    ) -> TouchOutcome {
        let Some(member) = self
            .rooms
            .get_mut(room)
            .and_then(|r| r.members.get_mut(player))
        else {
            return TouchOutcome::Missing;
        };
        if member.conn != conn {
            return TouchOutcome::Superseded;
        }
        member.last_activity = now;
        TouchOutcome::Refreshed
    }

    /// Evicts every member inactive for longer than `threshold`, then
    /// drops rooms left empty. Returns the evicted memberships so the
    /// caller can decide whether to notify the survivors.
    pub fn sweep(&mut self, threshold: Duration, now: Instant) -> Vec<(RoomId, PlayerId)> {
        let mut evicted = Vec::new();
        for (room_id, room) in &mut self.rooms {
            room.members.retain(|player, member| {
                if now.duration_since(member.last_activity) > threshold {
                    info!("Player {} timed out in {}, evicting", player, room_id);
                    evicted.push((room_id.clone(), player.clone()));
                    false
                } else {
                    true
                }
            });
        }
        self.rooms.retain(|room_id, room| {
            if room.is_empty() {
                info!("Room {} removed (empty)", room_id);
                false
            } else {
                true
            }
        });
        evicted
    }

    /// Snapshot of every room for introspection. No ordering guarantee.
    pub fn list(&self) -> RoomsSnapshot {
        RoomsSnapshot {
            rooms: self
                .rooms
                .iter()
                .map(|(id, room)| RoomSummary {
                    room: id.clone(),
                    players: room.members.len(),
                    player_names: room.members.keys().cloned().collect(),
                })
                .collect(),
        }
    }

    /// Snapshot of one room's membership, or `None` if the room does not
    /// exist.
    pub fn snapshot(&self, room: &RoomId) -> Option<RoomSnapshot> {
        self.rooms.get(room).map(|r| RoomSnapshot {
            room: r.id.clone(),
            players: r.members.keys().cloned().collect(),
        })
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
