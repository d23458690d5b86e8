use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::RelayConfig;
use crate::messages::{RoomSnapshot, RoomsSnapshot, ServerMessage, update_envelope};
use crate::registry::{RoomRegistry, TouchOutcome};
use crate::types::{ClientSender, ConnId, PlayerId, RelayError, RoomId};

/// Commands sent to the relay actor
pub(crate) enum RelayCommand {
    /// Register a membership, vacating `prev` first on a room switch.
    Join {
        room: RoomId,
        player: PlayerId,
        conn: ConnId,
        prev: Option<(RoomId, PlayerId)>,
        client_tx: ClientSender,
        reply: oneshot::Sender<()>,
    },

    /// Fan an update out to the sender's room.
    Update {
        room: RoomId,
        player: PlayerId,
        conn: ConnId,
        client_tx: ClientSender,
        fields: Map<String, Value>,
    },

    /// Remove the membership of a closed connection.
    Close {
        room: RoomId,
        player: PlayerId,
        conn: ConnId,
    },

    ListRooms {
        reply: oneshot::Sender<RoomsSnapshot>,
    },

    GetRoom {
        room: RoomId,
        reply: oneshot::Sender<Option<RoomSnapshot>>,
    },
}

/// The relay actor: owns the room registry and the sweep timer.
///
/// Every registry mutation happens on this task, so message handling and
/// sweeps are serialized by construction and no lock is ever held across
/// a send (sends are non-blocking unbounded pushes anyway).
pub(crate) async fn relay_actor(mut rx: mpsc::Receiver<RelayCommand>, config: RelayConfig) {
    let mut registry = RoomRegistry::new();
    let mut sweep = time::interval(config.sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            cmd = rx.recv() => {
                match cmd {
                    Some(cmd) => handle_command(&mut registry, cmd),
                    None => break,
                }
            }
            _ = sweep.tick() => {
                run_sweep(&mut registry, &config);
            }
        }
    }
}

fn handle_command(registry: &mut RoomRegistry, cmd: RelayCommand) {
    match cmd {
        RelayCommand::Join {
            room,
            player,
            conn,
            prev,
            client_tx,
            reply,
        } => {
            // Room switch: vacate the old room before entering the new one.
            if let Some((old_room, old_player)) = prev {
                if registry.remove_member(&old_room, &old_player, conn) {
                    info!("Player {} left {} (switched rooms)", old_player, old_room);
                    let msg = ServerMessage::PlayerLeft { player: old_player }.to_outbound();
                    if let Some(r) = registry.get(&old_room) {
                        r.broadcast(&msg, None);
                    }
                    registry.remove_if_empty(&old_room);
                }
            }

            let replaced =
                registry.insert_member(&room, player.clone(), conn, client_tx, Instant::now());
            if replaced.is_some() {
                info!("Player {} in {} superseded by {}", player, room, conn);
            }
            info!("Player {} joined room {}", player, room);

            let msg = ServerMessage::PlayerJoined {
                player: player.clone(),
            }
            .to_outbound();
            if let Some(r) = registry.get(&room) {
                r.broadcast(&msg, Some(&player));
            }

            let _ = reply.send(());
        }

        RelayCommand::Update {
            room,
            player,
            conn,
            client_tx,
            fields,
        } => {
            let now = Instant::now();
            match registry.touch(&room, &player, conn, now) {
                TouchOutcome::Refreshed => {}
                TouchOutcome::Missing => {
                    // Evicted by the sweeper but still connected. The
                    // session is authoritative, so restore the member.
                    info!("Player {} re-registered in {}", player, room);
                    registry.insert_member(&room, player.clone(), conn, client_tx, now);
                }
                TouchOutcome::Superseded => {
                    debug!(
                        "Dropping update from superseded connection {} for {} in {}",
                        conn, player, room
                    );
                    return;
                }
            }

            let msg = update_envelope(&player, fields);
            if let Some(r) = registry.get(&room) {
                r.broadcast(&msg, Some(&player));
            }
        }

        RelayCommand::Close { room, player, conn } => {
            if registry.remove_member(&room, &player, conn) {
                info!("Player {} left room {}", player, room);
                // The leaver is already removed, so no exclusion needed.
                let msg = ServerMessage::PlayerLeft { player }.to_outbound();
                if let Some(r) = registry.get(&room) {
                    r.broadcast(&msg, None);
                }
                registry.remove_if_empty(&room);
            }
        }

        RelayCommand::ListRooms { reply } => {
            let _ = reply.send(registry.list());
        }

        RelayCommand::GetRoom { room, reply } => {
            let _ = reply.send(registry.snapshot(&room));
        }
    }
}

fn run_sweep(registry: &mut RoomRegistry, config: &RelayConfig) {
    let evicted = registry.sweep(config.inactivity_timeout, Instant::now());
    if config.notify_on_evict {
        for (room, player) in evicted {
            let msg = ServerMessage::PlayerLeft { player }.to_outbound();
            if let Some(r) = registry.get(&room) {
                r.broadcast(&msg, None);
            }
        }
    }
}

/// Handle to communicate with the relay actor
#[derive(Clone)]
pub struct RelayHandle {
    pub(crate) tx: mpsc::Sender<RelayCommand>,
}

impl RelayHandle {
    /// Register a membership; resolves once the actor has applied it and
    /// notified the room.
    pub(crate) async fn join(
        &self,
        room: RoomId,
        player: PlayerId,
        conn: ConnId,
        prev: Option<(RoomId, PlayerId)>,
        client_tx: ClientSender,
    ) -> Result<(), RelayError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(RelayCommand::Join {
                room,
                player,
                conn,
                prev,
                client_tx,
                reply: reply_tx,
            })
            .await;
        reply_rx
            .await
            .map_err(|_| RelayError::Internal("actor channel closed".to_string()))
    }

    /// Fan an update out to the sender's room (fire-and-forget).
    pub(crate) async fn update(
        &self,
        room: RoomId,
        player: PlayerId,
        conn: ConnId,
        client_tx: ClientSender,
        fields: Map<String, Value>,
    ) {
        let _ = self
            .tx
            .send(RelayCommand::Update {
                room,
                player,
                conn,
                client_tx,
                fields,
            })
            .await;
    }

    /// Remove the membership of a closed connection (fire-and-forget).
    pub(crate) async fn close(&self, room: RoomId, player: PlayerId, conn: ConnId) {
        let _ = self.tx.send(RelayCommand::Close { room, player, conn }).await;
    }

    /// Snapshot of every active room.
    pub async fn list_rooms(&self) -> Result<RoomsSnapshot, RelayError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.tx.send(RelayCommand::ListRooms { reply: reply_tx }).await;
        reply_rx
            .await
            .map_err(|_| RelayError::Internal("actor channel closed".to_string()))
    }

    /// Snapshot of one room's membership.
    pub async fn room_snapshot(&self, room: RoomId) -> Result<RoomSnapshot, RelayError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(RelayCommand::GetRoom {
                room: room.clone(),
                reply: reply_tx,
            })
            .await;
        reply_rx
            .await
            .map_err(|_| RelayError::Internal("actor channel closed".to_string()))?
            .ok_or(RelayError::RoomNotFound(room))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::types::OutboundMessage;

    fn spawn_actor(config: RelayConfig) -> RelayHandle {
        let (tx, rx) = mpsc::channel::<RelayCommand>(1024);
        tokio::spawn(relay_actor(rx, config));
        RelayHandle { tx }
    }

    fn client() -> (ClientSender, UnboundedReceiver<OutboundMessage>) {
        mpsc::unbounded_channel()
    }

    fn rid(s: &str) -> RoomId {
        RoomId::from(s)
    }

    fn pid(s: &str) -> PlayerId {
        PlayerId::from(s)
    }

    fn fields(v: serde_json::Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    /// Round-trips through the actor so every prior fire-and-forget
    /// command has been applied.
    async fn settle(handle: &RelayHandle) {
        let _ = handle.list_rooms().await;
    }

    #[tokio::test]
    async fn join_registers_membership() {
        let handle = spawn_actor(RelayConfig::default());
        let (tx, _rx) = client();

        handle
            .join(rid("r1"), pid("alice"), ConnId::generate(), None, tx)
            .await
            .unwrap();

        let snapshot = handle.room_snapshot(rid("r1")).await.unwrap();
        assert_eq!(snapshot.players, vec![pid("alice")]);
    }

    #[tokio::test]
    async fn join_notifies_existing_members() {
        let handle = spawn_actor(RelayConfig::default());
        let (tx_a, mut rx_a) = client();
        let (tx_b, mut rx_b) = client();

        handle
            .join(rid("r1"), pid("alice"), ConnId::generate(), None, tx_a)
            .await
            .unwrap();
        handle
            .join(rid("r1"), pid("bob"), ConnId::generate(), None, tx_b)
            .await
            .unwrap();

        let msg = rx_a.try_recv().unwrap();
        assert_eq!(msg.as_str(), r#"{"type":"player_joined","player":"bob"}"#);
        assert!(rx_b.try_recv().is_err(), "joiner must not hear about itself");
    }

    #[tokio::test]
    async fn update_fans_out_with_stamped_identity() {
        let handle = spawn_actor(RelayConfig::default());
        let (tx_a, _rx_a) = client();
        let (tx_b, mut rx_b) = client();
        let conn_a = ConnId::generate();

        handle
            .join(rid("r1"), pid("alice"), conn_a, None, tx_a.clone())
            .await
            .unwrap();
        handle
            .join(rid("r1"), pid("bob"), ConnId::generate(), None, tx_b)
            .await
            .unwrap();

        handle
            .update(
                rid("r1"),
                pid("alice"),
                conn_a,
                tx_a,
                fields(json!({"hp": 80, "player": "mallory"})),
            )
            .await;
        settle(&handle).await;

        let msg = rx_b.try_recv().unwrap();
        let value: Value = serde_json::from_str(msg.as_str()).unwrap();
        assert_eq!(value["type"], "update");
        assert_eq!(value["player"], "alice");
        assert_eq!(value["hp"], 80);
    }

    #[tokio::test]
    async fn close_notifies_remaining_members() {
        let handle = spawn_actor(RelayConfig::default());
        let (tx_a, mut rx_a) = client();
        let (tx_b, _rx_b) = client();
        let conn_b = ConnId::generate();

        handle
            .join(rid("r1"), pid("alice"), ConnId::generate(), None, tx_a)
            .await
            .unwrap();
        handle
            .join(rid("r1"), pid("bob"), conn_b, None, tx_b)
            .await
            .unwrap();

        handle.close(rid("r1"), pid("bob"), conn_b).await;
        settle(&handle).await;

        // alice saw bob arrive, then leave
        assert_eq!(
            rx_a.try_recv().unwrap().as_str(),
            r#"{"type":"player_joined","player":"bob"}"#
        );
        assert_eq!(
            rx_a.try_recv().unwrap().as_str(),
            r#"{"type":"player_left","player":"bob"}"#
        );

        let snapshot = handle.room_snapshot(rid("r1")).await.unwrap();
        assert_eq!(snapshot.players, vec![pid("alice")]);
    }

    #[tokio::test]
    async fn closing_last_member_removes_room() {
        let handle = spawn_actor(RelayConfig::default());
        let (tx, _rx) = client();
        let conn = ConnId::generate();

        handle
            .join(rid("r1"), pid("alice"), conn, None, tx)
            .await
            .unwrap();
        handle.close(rid("r1"), pid("alice"), conn).await;
        settle(&handle).await;

        assert!(matches!(
            handle.room_snapshot(rid("r1")).await,
            Err(RelayError::RoomNotFound(_))
        ));
    }

    #[tokio::test]
    async fn room_switch_moves_membership_and_notifies_old_room() {
        let handle = spawn_actor(RelayConfig::default());
        let (tx_a, _rx_a) = client();
        let (tx_b, mut rx_b) = client();
        let conn_a = ConnId::generate();

        handle
            .join(rid("r1"), pid("alice"), conn_a, None, tx_a.clone())
            .await
            .unwrap();
        handle
            .join(rid("r1"), pid("bob"), ConnId::generate(), None, tx_b)
            .await
            .unwrap();

        handle
            .join(
                rid("r2"),
                pid("alice"),
                conn_a,
                Some((rid("r1"), pid("alice"))),
                tx_a,
            )
            .await
            .unwrap();

        assert_eq!(
            rx_b.try_recv().unwrap().as_str(),
            r#"{"type":"player_left","player":"alice"}"#
        );
        let r1 = handle.room_snapshot(rid("r1")).await.unwrap();
        assert_eq!(r1.players, vec![pid("bob")]);
        let r2 = handle.room_snapshot(rid("r2")).await.unwrap();
        assert_eq!(r2.players, vec![pid("alice")]);
    }

    #[tokio::test]
    async fn switch_out_of_emptied_room_removes_it() {
        let handle = spawn_actor(RelayConfig::default());
        let (tx, _rx) = client();
        let conn = ConnId::generate();

        handle
            .join(rid("r1"), pid("alice"), conn, None, tx.clone())
            .await
            .unwrap();
        handle
            .join(rid("r2"), pid("alice"), conn, Some((rid("r1"), pid("alice"))), tx)
            .await
            .unwrap();

        assert!(matches!(
            handle.room_snapshot(rid("r1")).await,
            Err(RelayError::RoomNotFound(_))
        ));
    }

    #[tokio::test]
    async fn superseded_connection_cannot_remove_replacement() {
        let handle = spawn_actor(RelayConfig::default());
        let (tx_old, _rx_old) = client();
        let (tx_new, _rx_new) = client();
        let conn_old = ConnId::generate();
        let conn_new = ConnId::generate();

        handle
            .join(rid("r1"), pid("alice"), conn_old, None, tx_old)
            .await
            .unwrap();
        // Same player name from a fresh connection replaces the entry.
        handle
            .join(rid("r1"), pid("alice"), conn_new, None, tx_new)
            .await
            .unwrap();

        // The old connection's teardown must not evict the new member.
        handle.close(rid("r1"), pid("alice"), conn_old).await;
        settle(&handle).await;

        let snapshot = handle.room_snapshot(rid("r1")).await.unwrap();
        assert_eq!(snapshot.players, vec![pid("alice")]);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_silent_member_and_room() {
        let handle = spawn_actor(RelayConfig::default());
        let (tx, _rx) = client();

        handle
            .join(rid("r1"), pid("alice"), ConnId::generate(), None, tx)
            .await
            .unwrap();

        // Past the 10s threshold plus one 5s sweep.
        time::advance(Duration::from_secs(16)).await;

        let snapshot = handle.list_rooms().await.unwrap();
        assert!(snapshot.rooms.is_empty(), "silent member and room swept");
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_keeps_active_member() {
        let handle = spawn_actor(RelayConfig::default());
        let (tx, _rx) = client();
        let conn = ConnId::generate();

        handle
            .join(rid("r1"), pid("alice"), conn, None, tx.clone())
            .await
            .unwrap();

        // Keep updating more often than the threshold.
        for _ in 0..4 {
            time::advance(Duration::from_secs(4)).await;
            handle
                .update(rid("r1"), pid("alice"), conn, tx.clone(), Map::new())
                .await;
            settle(&handle).await;
        }

        let snapshot = handle.room_snapshot(rid("r1")).await.unwrap();
        assert_eq!(snapshot.players, vec![pid("alice")]);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_eviction_is_silent_by_default() {
        let handle = spawn_actor(RelayConfig::default());
        let (tx_a, _rx_a) = client();
        let (tx_b, mut rx_b) = client();
        let conn_b = ConnId::generate();

        handle
            .join(rid("r1"), pid("alice"), ConnId::generate(), None, tx_a)
            .await
            .unwrap();
        handle
            .join(rid("r1"), pid("bob"), conn_b, None, tx_b.clone())
            .await
            .unwrap();

        // bob stays active while alice goes silent
        time::advance(Duration::from_secs(8)).await;
        handle
            .update(rid("r1"), pid("bob"), conn_b, tx_b, Map::new())
            .await;
        settle(&handle).await;

        time::advance(Duration::from_secs(8)).await;

        let snapshot = handle.room_snapshot(rid("r1")).await.unwrap();
        assert_eq!(snapshot.players, vec![pid("bob")]);
        assert!(rx_b.try_recv().is_err(), "no player_left on sweep eviction");
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_eviction_notifies_when_configured() {
        let config = RelayConfig {
            notify_on_evict: true,
            ..RelayConfig::default()
        };
        let handle = spawn_actor(config);
        let (tx_a, _rx_a) = client();
        let (tx_b, mut rx_b) = client();
        let conn_b = ConnId::generate();

        handle
            .join(rid("r1"), pid("alice"), ConnId::generate(), None, tx_a)
            .await
            .unwrap();
        handle
            .join(rid("r1"), pid("bob"), conn_b, None, tx_b.clone())
            .await
            .unwrap();

        time::advance(Duration::from_secs(8)).await;
        handle
            .update(rid("r1"), pid("bob"), conn_b, tx_b, Map::new())
            .await;
        settle(&handle).await;

        time::advance(Duration::from_secs(8)).await;
        settle(&handle).await;

        let msg = rx_b.try_recv().unwrap();
        assert_eq!(msg.as_str(), r#"{"type":"player_left","player":"alice"}"#);
    }

    #[tokio::test]
    async fn update_after_eviction_re_registers() {
        let handle = spawn_actor(RelayConfig::default());
        let (tx_a, _rx_a) = client();
        let (tx_b, mut rx_b) = client();
        let conn_a = ConnId::generate();

        handle
            .join(rid("r1"), pid("alice"), conn_a, None, tx_a.clone())
            .await
            .unwrap();
        handle
            .join(rid("r1"), pid("bob"), ConnId::generate(), None, tx_b)
            .await
            .unwrap();

        // Simulate alice having been swept: close removes her entry.
        handle.close(rid("r1"), pid("alice"), conn_a).await;
        settle(&handle).await;
        let _ = rx_b.try_recv(); // drain player_left

        // Her connection is still up and sends an update.
        handle
            .update(rid("r1"), pid("alice"), conn_a, tx_a, fields(json!({"hp": 1})))
            .await;
        settle(&handle).await;

        // bob receives it and alice is a member again.
        let value: Value = serde_json::from_str(rx_b.try_recv().unwrap().as_str()).unwrap();
        assert_eq!(value["player"], "alice");
        let snapshot = handle.room_snapshot(rid("r1")).await.unwrap();
        assert!(snapshot.players.contains(&pid("alice")));
    }

    #[tokio::test]
    async fn room_snapshot_unknown_room_is_not_found() {
        let handle = spawn_actor(RelayConfig::default());
        let result = handle.room_snapshot(rid("nowhere")).await;
        assert!(matches!(result, Err(RelayError::RoomNotFound(room)) if room.as_str() == "nowhere"));
    }
}
