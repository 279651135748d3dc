//! Match Map
//!
//! Immutable graph of sites, rivers and mines. Loaded once per process and
//! shared read-only by validation and scoring.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::hash::{digest_hex, MapDigest, MapHasher};

/// Site identifier.
pub type SiteId = u32;

// =============================================================================
// WIRE SHAPES
// =============================================================================

/// A graph vertex.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    /// Site identifier.
    pub id: SiteId,
}

/// An undirected edge as written in map files and messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct River {
    /// One endpoint.
    pub source: SiteId,
    /// The other endpoint.
    pub target: SiteId,
}

impl River {
    /// Create a river between two sites.
    pub const fn new(source: SiteId, target: SiteId) -> Self {
        Self { source, target }
    }

    /// Canonical key of this river.
    pub fn key(&self) -> RiverKey {
        RiverKey::new(self.source, self.target)
    }
}

/// Map contents exactly as serialized in the setup message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapData {
    /// All sites.
    pub sites: Vec<Site>,
    /// All rivers.
    pub rivers: Vec<River>,
    /// Mine site ids.
    pub mines: Vec<SiteId>,
}

// =============================================================================
// RIVER KEY
// =============================================================================

/// Canonical river identity: endpoints ordered smaller first.
///
/// Used directly as a map key for claim and option tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RiverKey {
    lo: SiteId,
    hi: SiteId,
}

impl RiverKey {
    /// Build the key for `a`-`b`, independent of endpoint order.
    pub fn new(a: SiteId, b: SiteId) -> Self {
        if a <= b {
            Self { lo: a, hi: b }
        } else {
            Self { lo: b, hi: a }
        }
    }

    /// Smaller endpoint.
    pub fn lo(&self) -> SiteId {
        self.lo
    }

    /// Larger endpoint.
    pub fn hi(&self) -> SiteId {
        self.hi
    }
}

// =============================================================================
// FUTURES
// =============================================================================

/// A pre-declared bet that `source` (a mine) ends up connected to `target`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FutureBet {
    /// Mine the bet starts from.
    pub source: SiteId,
    /// Non-mine site the bet targets.
    pub target: SiteId,
}

// =============================================================================
// GAME MAP
// =============================================================================

/// Map loading and validation errors.
#[derive(Debug, Error)]
pub enum MapError {
    /// Could not read the map file.
    #[error("Failed to read map: {0}")]
    Io(#[from] std::io::Error),

    /// Map file is not valid JSON of the expected shape.
    #[error("Invalid map JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Site id listed twice.
    #[error("Duplicate site {0}")]
    DuplicateSite(SiteId),

    /// River endpoint is not a site.
    #[error("River {0}-{1} references an unknown site")]
    UnknownRiverSite(SiteId, SiteId),

    /// River connects a site to itself.
    #[error("River {0}-{0} is a self-loop")]
    SelfLoop(SiteId),

    /// River listed twice (in either direction).
    #[error("Duplicate river {0}-{1}")]
    DuplicateRiver(SiteId, SiteId),

    /// Mine is not a site.
    #[error("Mine {0} is not a site")]
    UnknownMine(SiteId),
}

/// Read-only summary for monitoring.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MapInfo {
    /// Map name (file stem).
    pub name: String,
    /// Site count.
    pub sites: usize,
    /// River count.
    pub rivers: usize,
    /// Mine count.
    pub mines: usize,
    /// Hex SHA-256 of the canonical map contents.
    pub digest: String,
}

/// Validated, indexed map.
#[derive(Clone, Debug)]
pub struct GameMap {
    name: String,
    data: MapData,
    sites: BTreeSet<SiteId>,
    mines: BTreeSet<SiteId>,
    rivers: BTreeSet<RiverKey>,
    adjacency: BTreeMap<SiteId, Vec<SiteId>>,
}

impl GameMap {
    /// Validate and index map contents.
    pub fn new(name: impl Into<String>, data: MapData) -> Result<Self, MapError> {
        let mut sites = BTreeSet::new();
        for site in &data.sites {
            if !sites.insert(site.id) {
                return Err(MapError::DuplicateSite(site.id));
            }
        }

        let mut rivers = BTreeSet::new();
        for river in &data.rivers {
            if !sites.contains(&river.source) || !sites.contains(&river.target) {
                return Err(MapError::UnknownRiverSite(river.source, river.target));
            }
            if river.source == river.target {
                return Err(MapError::SelfLoop(river.source));
            }
            if !rivers.insert(river.key()) {
                return Err(MapError::DuplicateRiver(river.source, river.target));
            }
        }

        let mut mines = BTreeSet::new();
        for mine in &data.mines {
            if !sites.contains(mine) {
                return Err(MapError::UnknownMine(*mine));
            }
            mines.insert(*mine);
        }

        let adjacency = adjacency_of(rivers.iter().copied());

        Ok(Self {
            name: name.into(),
            data,
            sites,
            mines,
            rivers,
            adjacency,
        })
    }

    /// Parse map JSON.
    pub fn from_json(name: impl Into<String>, json: &str) -> Result<Self, MapError> {
        let data: MapData = serde_json::from_str(json)?;
        Self::new(name, data)
    }

    /// Load a map file. The map name is the file stem.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MapError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_json(name, &json)
    }

    /// Map name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Contents as sent to clients.
    pub fn data(&self) -> &MapData {
        &self.data
    }

    /// Whether a river exists, in either direction.
    pub fn has_river(&self, key: RiverKey) -> bool {
        self.rivers.contains(&key)
    }

    /// Whether a site is a mine.
    pub fn is_mine(&self, site: SiteId) -> bool {
        self.mines.contains(&site)
    }

    /// Whether a site exists.
    pub fn has_site(&self, site: SiteId) -> bool {
        self.sites.contains(&site)
    }

    /// Mines in ascending order.
    pub fn mines(&self) -> impl Iterator<Item = SiteId> + '_ {
        self.mines.iter().copied()
    }

    /// Number of mines (also the per-player option budget).
    pub fn mine_count(&self) -> usize {
        self.mines.len()
    }

    /// Number of rivers (also the turn limit).
    pub fn river_count(&self) -> usize {
        self.rivers.len()
    }

    /// Neighbours of a site over the full map.
    pub fn neighbours(&self, site: SiteId) -> &[SiteId] {
        self.adjacency.get(&site).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Keep only bets from a mine to an existing non-mine site.
    pub fn validate_futures(&self, futures: &[FutureBet]) -> Vec<FutureBet> {
        futures
            .iter()
            .filter(|f| self.is_mine(f.source) && self.has_site(f.target) && !self.is_mine(f.target))
            .copied()
            .collect()
    }

    /// SHA-256 over sorted sites, rivers and mines.
    pub fn digest(&self) -> MapDigest {
        let mut hasher = MapHasher::for_map();
        hasher.update_len(self.sites.len());
        for site in &self.sites {
            hasher.update_u32(*site);
        }
        hasher.update_len(self.rivers.len());
        for river in &self.rivers {
            hasher.update_u32(river.lo());
            hasher.update_u32(river.hi());
        }
        hasher.update_len(self.mines.len());
        for mine in &self.mines {
            hasher.update_u32(*mine);
        }
        hasher.finalize()
    }

    /// Summary for monitoring.
    pub fn info(&self) -> MapInfo {
        MapInfo {
            name: self.name.clone(),
            sites: self.sites.len(),
            rivers: self.rivers.len(),
            mines: self.mines.len(),
            digest: digest_hex(&self.digest()),
        }
    }
}

/// Undirected adjacency lists for a set of rivers.
pub(crate) fn adjacency_of(rivers: impl IntoIterator<Item = RiverKey>) -> BTreeMap<SiteId, Vec<SiteId>> {
    let mut adjacency: BTreeMap<SiteId, Vec<SiteId>> = BTreeMap::new();
    for key in rivers {
        adjacency.entry(key.lo()).or_default().push(key.hi());
        adjacency.entry(key.hi()).or_default().push(key.lo());
    }
    adjacency
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Build a map from site count, river pairs and mines.
    pub(crate) fn make_map(sites: u32, rivers: &[(SiteId, SiteId)], mines: &[SiteId]) -> GameMap {
        let data = MapData {
            sites: (0..sites).map(|id| Site { id }).collect(),
            rivers: rivers.iter().map(|&(s, t)| River::new(s, t)).collect(),
            mines: mines.to_vec(),
        };
        GameMap::new("test", data).unwrap()
    }

    #[test]
    fn test_river_key_canonical() {
        let key = RiverKey::new(5, 2);
        assert_eq!(key.lo(), 2);
        assert_eq!(key.hi(), 5);
        assert_eq!(River::new(2, 5).key(), River::new(5, 2).key());
    }

    proptest! {
        #[test]
        fn prop_river_key_commutative(a in any::<u32>(), b in any::<u32>()) {
            prop_assert_eq!(RiverKey::new(a, b), RiverKey::new(b, a));
        }
    }

    #[test]
    fn test_parse_map_json() {
        let json = r#"{
            "sites": [{"id": 0}, {"id": 1}, {"id": 2}],
            "rivers": [{"source": 0, "target": 1}, {"source": 2, "target": 1}],
            "mines": [1]
        }"#;
        let map = GameMap::from_json("tiny", json).unwrap();

        assert_eq!(map.name(), "tiny");
        assert_eq!(map.river_count(), 2);
        assert_eq!(map.mine_count(), 1);
        assert!(map.has_river(RiverKey::new(1, 2)));
        assert!(!map.has_river(RiverKey::new(0, 2)));
        assert_eq!(map.neighbours(1), &[0, 2]);
    }

    #[test]
    fn test_rejects_duplicate_river_either_direction() {
        let data = MapData {
            sites: vec![Site { id: 0 }, Site { id: 1 }],
            rivers: vec![River::new(0, 1), River::new(1, 0)],
            mines: vec![],
        };
        assert!(matches!(GameMap::new("dup", data), Err(MapError::DuplicateRiver(1, 0))));
    }

    #[test]
    fn test_rejects_unknown_endpoints_and_mines() {
        let data = MapData {
            sites: vec![Site { id: 0 }],
            rivers: vec![River::new(0, 7)],
            mines: vec![],
        };
        assert!(matches!(GameMap::new("bad", data), Err(MapError::UnknownRiverSite(0, 7))));

        let data = MapData {
            sites: vec![Site { id: 0 }],
            rivers: vec![],
            mines: vec![3],
        };
        assert!(matches!(GameMap::new("bad", data), Err(MapError::UnknownMine(3))));
    }

    #[test]
    fn test_rejects_self_loop_and_duplicate_site() {
        let data = MapData {
            sites: vec![Site { id: 0 }],
            rivers: vec![River::new(0, 0)],
            mines: vec![],
        };
        assert!(matches!(GameMap::new("loop", data), Err(MapError::SelfLoop(0))));

        let data = MapData {
            sites: vec![Site { id: 4 }, Site { id: 4 }],
            rivers: vec![],
            mines: vec![],
        };
        assert!(matches!(GameMap::new("twice", data), Err(MapError::DuplicateSite(4))));
    }

    #[test]
    fn test_validate_futures() {
        let map = make_map(4, &[(0, 1), (1, 2), (2, 3)], &[0, 3]);
        let bets = [
            FutureBet { source: 0, target: 2 },  // ok
            FutureBet { source: 1, target: 2 },  // source not a mine
            FutureBet { source: 0, target: 3 },  // mine to mine
            FutureBet { source: 3, target: 99 }, // unknown target
            FutureBet { source: 3, target: 1 },  // ok
        ];

        let kept = map.validate_futures(&bets);
        assert_eq!(kept, vec![FutureBet { source: 0, target: 2 }, FutureBet { source: 3, target: 1 }]);
    }

    #[test]
    fn test_digest_ignores_river_direction() {
        let a = make_map(3, &[(0, 1), (1, 2)], &[0]);
        let b = make_map(3, &[(2, 1), (1, 0)], &[0]);
        let c = make_map(3, &[(0, 1), (0, 2)], &[0]);

        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn test_map_info() {
        let map = make_map(3, &[(0, 1), (1, 2)], &[0]);
        let info = map.info();
        assert_eq!(info.name, "test");
        assert_eq!((info.sites, info.rivers, info.mines), (3, 2, 1));
        assert_eq!(info.digest.len(), 64);
    }
}
