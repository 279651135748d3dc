//! Game Logic Module
//!
//! The rules, free of sockets and timers.
//!
//! ## Module Structure
//!
//! - `map`: Sites, rivers, mines, loading and validation
//! - `board`: Claims, options, splurges, turn rotation, move log
//! - `scoring`: Mine distances and per-punter scores

pub mod map;
pub mod board;
pub mod scoring;

pub use map::{FutureBet, GameMap, MapData, MapError, MapInfo, River, RiverKey, Site, SiteId};
pub use board::{Board, BoardError, ClientMove, MoveEntry, PunterId, PunterScore, Rules, TurnOutcome};
pub use scoring::{MineDistances, Scorer};
