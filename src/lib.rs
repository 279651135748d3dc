//! # Punter Server
//!
//! Referee for the river-claiming punter game, played by untrusted clients
//! over raw TCP.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PUNTER SERVER                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Leaf utilities                            │
//! │  ├── rng.rs      - Fisher-Yates seat shuffle                 │
//! │  └── hash.rs     - Map fingerprinting                        │
//! │                                                              │
//! │  game/           - Rules (no sockets, no timers)             │
//! │  ├── map.rs      - Sites, rivers, mines, validation          │
//! │  ├── board.rs    - Claims, options, splurges, turn order     │
//! │  └── scoring.rs  - BFS distances and scores                  │
//! │                                                              │
//! │  network/        - Connections and the match actor           │
//! │  ├── codec.rs    - `<length>:<json>` framing                 │
//! │  ├── protocol.rs - Message shapes                            │
//! │  ├── player.rs   - Per-connection state machine              │
//! │  ├── session.rs  - Match orchestration                       │
//! │  └── server.rs   - TCP listener and tasks                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ordering
//!
//! Socket I/O runs concurrently, one reader and one writer task per
//! connection, but every decoded message and every timer is applied to the
//! match by a single task, one at a time. The `game/` layer iterates with
//! `BTreeMap`/`BTreeSet`, so scores and logs do not depend on hash order.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::rng::Shuffler;
pub use game::board::{Board, ClientMove, MoveEntry, PunterId, PunterScore, Rules};
pub use game::map::{GameMap, MapError, MapInfo, RiverKey, SiteId};
pub use network::server::{GameServer, GameServerError, MatchHandle, ServerConfig};
pub use network::session::{MatchConfig, MatchSession, MatchStats};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
