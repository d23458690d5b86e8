use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tracing::{debug, error, info, warn};

use crate::actor::{RelayCommand, RelayHandle, relay_actor};
use crate::config::RelayConfig;
use crate::messages::{Inbound, ParseError, ServerMessage, parse_inbound};
use crate::session::Session;
use crate::types::{ClientSender, ConnId, OutboundMessage};

pub const DEFAULT_RELAY_PORT: u16 = 8080;
const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RelayServer {
    listener: TcpListener,
    handle: RelayHandle,
}

impl RelayServer {
    /// Binds the listener and spawns the relay actor.
    pub async fn bind(addr: &str, config: RelayConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let (tx, rx) = mpsc::channel::<RelayCommand>(1024);
        tokio::spawn(relay_actor(rx, config));

        info!("Relay listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            handle: RelayHandle { tx },
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle for the introspection surface (room listings/snapshots).
    pub fn handle(&self) -> RelayHandle {
        self.handle.clone()
    }

    pub async fn run(self) -> std::io::Result<()> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            let handle = self.handle.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, handle).await {
                    error!("Connection error from {}: {}", addr, e);
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handle: RelayHandle,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let conn = ConnId::generate();
    info!("WebSocket connection from {} ({})", addr, conn);

    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<Message>();

    let mut session = Session::new(conn);
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    let mut waiting_for_pong = false;
    let mut pong_deadline: Option<tokio::time::Instant> = None;

    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(msg) = rx.recv() => {
                    let ws_msg = Message::Text(msg.into_inner());
                    if ws_tx.send(ws_msg).await.is_err() {
                        break;
                    }
                }
                Some(ctrl_msg) = ctrl_rx.recv() => {
                    if ws_tx.send(ctrl_msg).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    loop {
        let pong_timeout = async {
            match pong_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = ping_interval.tick() => {
                if waiting_for_pong {
                    warn!("No Pong received, disconnecting {}", addr);
                    break;
                }
                if ctrl_tx.send(Message::Ping(Bytes::new())).is_err() {
                    break;
                }
                waiting_for_pong = true;
                pong_deadline = Some(tokio::time::Instant::now() + PONG_TIMEOUT);
                debug!("Ping sent to {}", addr);
            }

            _ = pong_timeout => {
                warn!("Pong timeout, disconnecting {}", addr);
                break;
            }

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => {
                        dispatch(&text, &tx, &handle, &mut session).await;
                    }
                    Message::Pong(_) => {
                        waiting_for_pong = false;
                        pong_deadline = None;
                        debug!("Pong received from {}", addr);
                    }
                    Message::Close(_) => {
                        info!("Close received from {}", addr);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    handle_close(&handle, &mut session).await;

    send_task.abort();
    info!("WebSocket disconnected: {} ({})", addr, conn);

    Ok(())
}

/// Interprets one inbound text frame and drives the relay actor.
async fn dispatch(text: &str, tx: &ClientSender, handle: &RelayHandle, session: &mut Session) {
    let inbound = match parse_inbound(text) {
        Ok(m) => m,
        Err(ParseError::Malformed) => {
            warn!("Discarding malformed message from {}", session.conn());
            return;
        }
        Err(err @ ParseError::MissingField(_)) => {
            let reply = ServerMessage::Error {
                message: err.to_string(),
            };
            let _ = tx.send(reply.to_outbound());
            return;
        }
    };

    match inbound {
        Inbound::Join { room, player } => {
            let prev = session.join(room.clone(), player.clone());
            let joined = handle
                .join(room.clone(), player, session.conn(), prev, tx.clone())
                .await;
            if joined.is_ok() {
                let reply = ServerMessage::Joined { room };
                let _ = tx.send(reply.to_outbound());
            }
        }

        Inbound::Update { fields } => match session.membership() {
            Some((room, player)) => {
                handle
                    .update(room.clone(), player.clone(), session.conn(), tx.clone(), fields)
                    .await;
            }
            None => {
                let reply = ServerMessage::Error {
                    message: "must join a room first".to_string(),
                };
                let _ = tx.send(reply.to_outbound());
            }
        },

        Inbound::Unknown => {
            debug!("Ignoring unknown message type from {}", session.conn());
        }
    }
}

/// Terminal transition: removes the membership and notifies the room.
async fn handle_close(handle: &RelayHandle, session: &mut Session) {
    if let Some((room, player)) = session.close() {
        handle.close(room, player, session.conn()).await;
    }
}
