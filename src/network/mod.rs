//! Network Layer
//!
//! Raw TCP server for punters. Everything here touches sockets, channels or
//! wall-clock timers; rules live in `game/`.

pub mod codec;
pub mod player;
pub mod protocol;
pub mod session;
pub mod server;

pub use codec::{encode_frame, FrameDecoder, FrameError};
pub use player::{ConnId, Player, PlayerPhase, Timeouts};
pub use protocol::{Outbound, ServerMessage};
pub use session::{MatchConfig, MatchPhase, MatchSession, MatchStats, SessionError};
pub use server::{GameServer, GameServerError, MatchHandle, ServerConfig};
