//! Board State
//!
//! Claim and option tables, banked passes, the move log and turn rotation.
//! Every submitted move is validated here; anything that breaks a rule is
//! committed as a pass instead.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Not;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::game::map::{FutureBet, GameMap, River, RiverKey, SiteId};
use crate::game::scoring::Scorer;

/// Seat number assigned at setup, `0..punters`.
pub type PunterId = usize;

// =============================================================================
// RULES
// =============================================================================

/// Optional rule extensions.
///
/// Serializes as the setup `settings` object, listing only enabled rules.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rules {
    /// Pre-declared mine-to-site bets.
    #[serde(default, skip_serializing_if = "Not::not")]
    pub futures: bool,
    /// Secondary rights over rivers claimed by others.
    #[serde(default, skip_serializing_if = "Not::not")]
    pub options: bool,
    /// Multi-river turns paid for with banked passes.
    #[serde(default, skip_serializing_if = "Not::not")]
    pub splurges: bool,
}

impl Rules {
    /// Whether any optional rule is enabled.
    pub fn any(&self) -> bool {
        self.futures || self.options || self.splurges
    }
}

// =============================================================================
// MOVES
// =============================================================================

/// A move as submitted by a client, before validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientMove {
    /// Claim an unclaimed river.
    Claim(River),
    /// Option a river claimed by someone else.
    OptionRiver(River),
    /// Claim/option a chain of rivers in one turn.
    Splurge(Vec<SiteId>),
    /// Do nothing this turn.
    Pass,
}

/// Claim or option as recorded in the log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiverMove {
    /// Acting punter.
    pub punter: PunterId,
    /// Endpoint as submitted.
    pub source: SiteId,
    /// Endpoint as submitted.
    pub target: SiteId,
}

/// Splurge as recorded in the log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplurgeMove {
    /// Acting punter.
    pub punter: PunterId,
    /// Sites visited, in order.
    pub route: Vec<SiteId>,
}

/// Pass as recorded in the log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassMove {
    /// Acting punter.
    pub punter: PunterId,
}

/// Accepted move, serialized as `{"claim": {...}}`, `{"pass": {...}}`, etc.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveEntry {
    /// Accepted claim.
    Claim(RiverMove),
    /// Accepted option.
    #[serde(rename = "option")]
    OptionRiver(RiverMove),
    /// Accepted splurge.
    Splurge(SplurgeMove),
    /// Pass, submitted or downgraded.
    Pass(PassMove),
}

impl MoveEntry {
    /// Pass entry for `punter`.
    pub fn pass(punter: PunterId) -> Self {
        MoveEntry::Pass(PassMove { punter })
    }

    /// Punter that made the move.
    pub fn punter(&self) -> PunterId {
        match self {
            MoveEntry::Claim(m) | MoveEntry::OptionRiver(m) => m.punter,
            MoveEntry::Splurge(m) => m.punter,
            MoveEntry::Pass(m) => m.punter,
        }
    }

    /// Whether this entry is a pass.
    pub fn is_pass(&self) -> bool {
        matches!(self, MoveEntry::Pass(_))
    }
}

/// State change produced by an accepted move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Effect {
    Claim(River),
    OptionRiver(River),
}

/// Validation result: the log entry plus its effects.
#[derive(Debug)]
struct Validated {
    entry: MoveEntry,
    effects: Vec<Effect>,
}

impl Validated {
    fn pass(punter: PunterId) -> Self {
        Self {
            entry: MoveEntry::pass(punter),
            effects: Vec::new(),
        }
    }
}

/// What happens after a committed move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Next punter to move.
    Next(PunterId),
    /// Turn limit reached.
    Finished,
}

/// Final score line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PunterScore {
    /// Punter id.
    pub punter: PunterId,
    /// Final score (futures can make it negative).
    pub score: i64,
}

/// Board errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardError {
    /// Move submitted by a punter who is not active.
    #[error("Punter {punter} moved out of turn (active: {active})")]
    NotYourTurn {
        /// Submitting punter.
        punter: PunterId,
        /// Active punter.
        active: PunterId,
    },

    /// Turn limit already reached.
    #[error("Game is over")]
    GameOver,
}

// =============================================================================
// BOARD
// =============================================================================

/// Gameplay state of one match.
#[derive(Debug)]
pub struct Board {
    map: Arc<GameMap>,
    rules: Rules,
    punters: usize,
    claims: BTreeMap<RiverKey, PunterId>,
    options: BTreeMap<RiverKey, PunterId>,
    claimed: Vec<Vec<River>>,
    optioned: Vec<Vec<River>>,
    passes: Vec<usize>,
    moves: Vec<MoveEntry>,
    active: PunterId,
    turn_count: usize,
    turn_limit: usize,
}

impl Board {
    /// Fresh board; the log starts with one pass per punter.
    pub fn new(map: Arc<GameMap>, punters: usize, rules: Rules) -> Self {
        let turn_limit = map.river_count();
        Self {
            map,
            rules,
            punters,
            claims: BTreeMap::new(),
            options: BTreeMap::new(),
            claimed: vec![Vec::new(); punters],
            optioned: vec![Vec::new(); punters],
            passes: vec![0; punters],
            moves: (0..punters).map(MoveEntry::pass).collect(),
            active: 0,
            turn_count: 0,
            turn_limit,
        }
    }

    /// Punter whose move is awaited.
    pub fn active_punter(&self) -> PunterId {
        self.active
    }

    /// Committed turns.
    pub fn turn_count(&self) -> usize {
        self.turn_count
    }

    /// Total turns in the game (the river count).
    pub fn turn_limit(&self) -> usize {
        self.turn_limit
    }

    /// Whether the turn limit has been reached.
    pub fn is_finished(&self) -> bool {
        self.turn_count >= self.turn_limit
    }

    /// Full move log.
    pub fn moves(&self) -> &[MoveEntry] {
        &self.moves
    }

    /// The trailing `punters` entries of the log.
    pub fn recent_moves(&self) -> Vec<MoveEntry> {
        let start = self.moves.len().saturating_sub(self.punters);
        self.moves[start..].to_vec()
    }

    /// Owner of a river's claim.
    pub fn claim_owner(&self, key: RiverKey) -> Option<PunterId> {
        self.claims.get(&key).copied()
    }

    /// Holder of a river's option.
    pub fn option_holder(&self, key: RiverKey) -> Option<PunterId> {
        self.options.get(&key).copied()
    }

    /// Options used so far by `punter`.
    pub fn options_used(&self, punter: PunterId) -> usize {
        self.optioned.get(punter).map_or(0, Vec::len)
    }

    /// Passes banked by `punter`.
    pub fn banked_passes(&self, punter: PunterId) -> usize {
        self.passes.get(punter).copied().unwrap_or(0)
    }

    /// Rivers that count for `punter`'s score.
    pub fn owned_rivers(&self, punter: PunterId) -> Vec<RiverKey> {
        let mut owned: Vec<RiverKey> = self.claimed[punter].iter().map(River::key).collect();
        if self.rules.options {
            owned.extend(self.optioned[punter].iter().map(River::key));
        }
        owned
    }

    /// Validate and apply a move from `punter`, then rotate the turn.
    pub fn commit(&mut self, punter: PunterId, mv: &ClientMove) -> Result<(MoveEntry, TurnOutcome), BoardError> {
        if self.is_finished() {
            return Err(BoardError::GameOver);
        }
        if punter != self.active {
            return Err(BoardError::NotYourTurn {
                punter,
                active: self.active,
            });
        }

        let validated = self.validate(punter, mv);
        for effect in &validated.effects {
            match *effect {
                Effect::Claim(river) => {
                    self.claims.insert(river.key(), punter);
                    self.claimed[punter].push(river);
                }
                Effect::OptionRiver(river) => {
                    self.options.insert(river.key(), punter);
                    self.optioned[punter].push(river);
                }
            }
        }

        match &validated.entry {
            MoveEntry::Pass(_) => self.passes[punter] += 1,
            MoveEntry::Splurge(s) => self.passes[punter] -= s.route.len() - 2,
            _ => {}
        }

        debug!(punter, turn = self.turn_count, entry = ?validated.entry, "Move committed");
        self.moves.push(validated.entry.clone());

        self.active = (self.active + 1) % self.punters;
        self.turn_count += 1;

        let outcome = if self.is_finished() {
            TurnOutcome::Finished
        } else {
            TurnOutcome::Next(self.active)
        };
        Ok((validated.entry, outcome))
    }

    fn validate(&self, punter: PunterId, mv: &ClientMove) -> Validated {
        match mv {
            ClientMove::Claim(river) => self.validate_claim(punter, *river),
            ClientMove::OptionRiver(river) if self.rules.options => self.validate_option(punter, *river),
            ClientMove::Splurge(route) if self.rules.splurges => self.validate_splurge(punter, route),
            _ => Validated::pass(punter),
        }
    }

    fn validate_claim(&self, punter: PunterId, river: River) -> Validated {
        let key = river.key();
        if !self.map.has_river(key) || self.claims.contains_key(&key) {
            return Validated::pass(punter);
        }
        Validated {
            entry: MoveEntry::Claim(RiverMove {
                punter,
                source: river.source,
                target: river.target,
            }),
            effects: vec![Effect::Claim(river)],
        }
    }

    fn validate_option(&self, punter: PunterId, river: River) -> Validated {
        let key = river.key();
        let optionable = self.map.has_river(key)
            && self.claims.get(&key).is_some_and(|owner| *owner != punter)
            && !self.options.contains_key(&key)
            && self.options_used(punter) < self.map.mine_count();
        if !optionable {
            return Validated::pass(punter);
        }
        Validated {
            entry: MoveEntry::OptionRiver(RiverMove {
                punter,
                source: river.source,
                target: river.target,
            }),
            effects: vec![Effect::OptionRiver(river)],
        }
    }

    fn validate_splurge(&self, punter: PunterId, route: &[SiteId]) -> Validated {
        if route.len() < 2 || self.banked_passes(punter) < route.len() - 2 {
            return Validated::pass(punter);
        }

        let mut options_left = self.map.mine_count().saturating_sub(self.options_used(punter));
        let mut seen = BTreeSet::new();
        let mut effects = Vec::with_capacity(route.len() - 1);

        for leg in route.windows(2) {
            let river = River::new(leg[0], leg[1]);
            let key = river.key();

            if !self.map.has_river(key) || !seen.insert(key) {
                return Validated::pass(punter);
            }

            match self.claims.get(&key) {
                None => effects.push(Effect::Claim(river)),
                Some(owner) => {
                    let optionable = self.rules.options
                        && *owner != punter
                        && options_left > 0
                        && !self.options.contains_key(&key);
                    if !optionable {
                        return Validated::pass(punter);
                    }
                    options_left -= 1;
                    effects.push(Effect::OptionRiver(river));
                }
            }
        }

        Validated {
            entry: MoveEntry::Splurge(SplurgeMove {
                punter,
                route: route.to_vec(),
            }),
            effects,
        }
    }

    /// Final scores, in punter order.
    ///
    /// `futures[p]` are punter `p`'s validated bets; ignored unless the
    /// futures rule is on.
    pub fn scores(&self, futures: &[Vec<FutureBet>]) -> Vec<PunterScore> {
        let scorer = Scorer::new(&self.map);
        (0..self.punters)
            .map(|punter| {
                let bets: &[FutureBet] = if self.rules.futures {
                    futures.get(punter).map(Vec::as_slice).unwrap_or(&[])
                } else {
                    &[]
                };
                PunterScore {
                    punter,
                    score: scorer.score(&self.owned_rivers(punter), bets),
                }
            })
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================
