//! Core primitives.
//!
//! Leaf utilities with no knowledge of the game rules.

pub mod rng;
pub mod hash;

pub use rng::Shuffler;
pub use hash::{digest_hex, MapDigest, MapHasher};
