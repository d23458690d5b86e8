//! Room-based presence relay over WebSocket

mod actor;
mod config;
mod messages;
mod registry;
mod server;
mod session;
mod types;

pub use actor::RelayHandle;
pub use config::RelayConfig;
pub use messages::{
    Inbound, ParseError, RoomSnapshot, RoomSummary, RoomsSnapshot, ServerMessage, parse_inbound,
    update_envelope,
};
pub use server::{DEFAULT_RELAY_PORT, RelayServer};
pub use session::{Session, SessionState};
pub use types::{ClientSender, ConnId, OutboundMessage, PlayerId, RelayError, RoomId};
