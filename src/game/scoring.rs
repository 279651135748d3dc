//! Scoring Engine
//!
//! Breadth-first distances from every mine over the full map, combined with
//! per-player reachability over the rivers that player owns.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::game::map::{adjacency_of, FutureBet, GameMap, RiverKey, SiteId};

/// Hop distance from each mine to each site reachable from it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MineDistances {
    distances: BTreeMap<SiteId, BTreeMap<SiteId, u64>>,
}

impl MineDistances {
    /// Run one BFS per mine over the full map.
    pub fn compute(map: &GameMap) -> Self {
        let distances = map
            .mines()
            .map(|mine| (mine, bfs(mine, |site| map.neighbours(site))))
            .collect();
        Self { distances }
    }

    /// Distance from `mine` to `site`; 0 when unreachable.
    pub fn get(&self, mine: SiteId, site: SiteId) -> u64 {
        self.distances
            .get(&mine)
            .and_then(|row| row.get(&site))
            .copied()
            .unwrap_or(0)
    }
}

/// Sites reachable from each mine over a subgraph.
fn reachable_from_mines(
    mines: impl Iterator<Item = SiteId>,
    rivers: &[RiverKey],
) -> BTreeMap<SiteId, BTreeSet<SiteId>> {
    let adjacency = adjacency_of(rivers.iter().copied());
    let neighbours = |site: SiteId| adjacency.get(&site).map(Vec::as_slice).unwrap_or(&[]);

    mines
        .map(|mine| (mine, bfs(mine, neighbours).into_keys().collect()))
        .collect()
}

/// Breadth-first search; first discovery distance wins.
fn bfs<'a, F>(start: SiteId, neighbours: F) -> BTreeMap<SiteId, u64>
where
    F: Fn(SiteId) -> &'a [SiteId],
{
    let mut seen = BTreeMap::new();
    let mut queue = VecDeque::new();
    seen.insert(start, 0);
    queue.push_back(start);

    while let Some(current) = queue.pop_front() {
        let wave = seen[&current];
        for &next in neighbours(current) {
            if !seen.contains_key(&next) {
                seen.insert(next, wave + 1);
                queue.push_back(next);
            }
        }
    }

    seen
}

/// Scores players against a fixed map.
///
/// Full-map distances are computed once and reused for every player.
#[derive(Debug)]
pub struct Scorer<'a> {
    map: &'a GameMap,
    distances: MineDistances,
}

impl<'a> Scorer<'a> {
    /// Precompute mine distances for `map`.
    pub fn new(map: &'a GameMap) -> Self {
        Self {
            map,
            distances: MineDistances::compute(map),
        }
    }

    /// Full-map distances.
    pub fn distances(&self) -> &MineDistances {
        &self.distances
    }

    /// Score one player.
    ///
    /// `rivers` are the rivers the player owns (claims, plus options when that
    /// rule is enabled). `futures` must already be validated; pass an empty
    /// slice when the futures rule is off.
    pub fn score(&self, rivers: &[RiverKey], futures: &[FutureBet]) -> i64 {
        let connected = reachable_from_mines(self.map.mines(), rivers);
        let is_connected = |mine: SiteId, site: SiteId| {
            mine != site && connected.get(&mine).is_some_and(|set| set.contains(&site))
        };

        let touched: BTreeSet<SiteId> = rivers.iter().flat_map(|r| [r.lo(), r.hi()]).collect();

        let mut score: i64 = 0;
        for mine in self.map.mines() {
            for &site in &touched {
                if is_connected(mine, site) {
                    let d = self.distances.get(mine, site) as i64;
                    score += d * d;
                }
            }
        }

        for future in futures {
            let d = self.distances.get(future.source, future.target) as i64;
            let weight = d * d * d;
            if is_connected(future.source, future.target) {
                score += weight;
            } else {
                score -= weight;
            }
        }

        score
    }
}

// =============================================================================
// TESTS
// =============================================================================
