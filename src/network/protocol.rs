//! Protocol Messages
//!
//! Message shapes exchanged with punters. Outbound messages are typed and
//! serialized with serde. Inbound messages are untrusted, so they are read
//! leniently from a raw `serde_json::Value`: unknown shapes are ignored or
//! downgraded rather than rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::game::board::{ClientMove, MoveEntry, PunterId, PunterScore, Rules};
use crate::game::map::{FutureBet, MapData, River, SiteId};

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to punter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Handshake acknowledgement.
    You(YouMessage),
    /// Setup payload.
    Setup(SetupMessage),
    /// Move request.
    Move(MoveMessage),
    /// Final scores.
    Stop(StopMessage),
    /// Timeout notice.
    Timeout(TimeoutMessage),
}

/// `{"you": name}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YouMessage {
    /// Echoed punter name.
    pub you: String,
}

/// `{"punter", "punters", "map", "settings"?}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupMessage {
    /// Assigned id.
    pub punter: PunterId,
    /// Total punters in the match.
    pub punters: usize,
    /// Full map.
    pub map: MapData,
    /// Enabled optional rules; absent when none are enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<Rules>,
}

impl SetupMessage {
    /// Build a setup payload, omitting `settings` when no rule is enabled.
    pub fn new(punter: PunterId, punters: usize, map: MapData, rules: Rules) -> Self {
        Self {
            punter,
            punters,
            map,
            settings: rules.any().then_some(rules),
        }
    }
}

/// `{"move": {"moves": [...]}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveMessage {
    /// Recent move window.
    #[serde(rename = "move")]
    pub request: MoveList,
}

/// Trailing window of the move log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveList {
    /// Most recent entries, oldest first.
    pub moves: Vec<MoveEntry>,
}

/// `{"stop": {"moves": [...], "scores": [...]}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopMessage {
    /// Final results.
    pub stop: StopInfo,
}

/// Body of the stop message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopInfo {
    /// Most recent entries, oldest first.
    pub moves: Vec<MoveEntry>,
    /// Score per punter, ordered by id.
    pub scores: Vec<PunterScore>,
}

/// `{"timeout": seconds}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeoutMessage {
    /// Timer duration that elapsed, in seconds.
    pub timeout: f64,
}

impl ServerMessage {
    /// Handshake acknowledgement.
    pub fn you(name: impl Into<String>) -> Self {
        ServerMessage::You(YouMessage { you: name.into() })
    }

    /// Move request carrying the recent move window.
    pub fn move_request(moves: Vec<MoveEntry>) -> Self {
        ServerMessage::Move(MoveMessage {
            request: MoveList { moves },
        })
    }

    /// Final stop message.
    pub fn stop(moves: Vec<MoveEntry>, scores: Vec<PunterScore>) -> Self {
        ServerMessage::Stop(StopMessage {
            stop: StopInfo { moves, scores },
        })
    }

    /// Timeout notice.
    pub fn timeout(seconds: f64) -> Self {
        ServerMessage::Timeout(TimeoutMessage { timeout: seconds })
    }
}

/// Item on a player's outbound queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Frame and write a message.
    Message(ServerMessage),
    /// Flush and close the socket.
    Close,
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Name from a handshake message (`{"me": name}`), if this is one.
///
/// Non-string names are kept as their JSON text.
pub fn parse_handshake(message: &Value) -> Option<String> {
    match message.get("me")? {
        Value::String(name) => Some(name.clone()),
        other => Some(other.to_string()),
    }
}

/// Futures from a ready message (`{"ready": id, "futures": [...]}`), if this
/// is one.
///
/// A missing or non-array `futures` field yields no bets; entries that are
/// not `{source, target}` objects are skipped.
pub fn parse_ready(message: &Value) -> Option<Vec<FutureBet>> {
    message.get("ready")?;
    let futures = match message.get("futures") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| FutureBet::deserialize(item).ok())
            .collect(),
        _ => Vec::new(),
    };
    Some(futures)
}

#[derive(Deserialize)]
struct RiverBody {
    source: SiteId,
    target: SiteId,
}

#[derive(Deserialize)]
struct SplurgeBody {
    route: Vec<SiteId>,
}

/// Move from a gameplay message.
///
/// Checked in order `claim`, `option`, `splurge`; the first key present
/// decides. A malformed body, or no recognised key, is a pass.
pub fn parse_move(message: &Value) -> ClientMove {
    if let Some(body) = message.get("claim") {
        return RiverBody::deserialize(body)
            .map(|r| ClientMove::Claim(River::new(r.source, r.target)))
            .unwrap_or(ClientMove::Pass);
    }
    if let Some(body) = message.get("option") {
        return RiverBody::deserialize(body)
            .map(|r| ClientMove::OptionRiver(River::new(r.source, r.target)))
            .unwrap_or(ClientMove::Pass);
    }
    if let Some(body) = message.get("splurge") {
        return SplurgeBody::deserialize(body)
            .map(|s| ClientMove::Splurge(s.route))
            .unwrap_or(ClientMove::Pass);
    }
    ClientMove::Pass
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::map::Site;
    use serde_json::json;

    fn small_map() -> MapData {
        MapData {
            sites: vec![Site { id: 0 }, Site { id: 1 }],
            rivers: vec![River::new(0, 1)],
            mines: vec![0],
        }
    }

    #[test]
    fn test_you_shape() {
        let value = serde_json::to_value(ServerMessage::you("alice")).unwrap();
        assert_eq!(value, json!({"you": "alice"}));
    }

    #[test]
    fn test_setup_omits_settings_without_rules() {
        let msg = ServerMessage::Setup(SetupMessage::new(1, 2, small_map(), Rules::default()));
        let value = serde_json::to_value(msg).unwrap();

        assert_eq!(
            value,
            json!({
                "punter": 1,
                "punters": 2,
                "map": {
                    "sites": [{"id": 0}, {"id": 1}],
                    "rivers": [{"source": 0, "target": 1}],
                    "mines": [0]
                }
            })
        );
    }

    #[test]
    fn test_setup_lists_only_enabled_rules() {
        let rules = Rules {
            futures: true,
            options: false,
            splurges: true,
        };
        let msg = ServerMessage::Setup(SetupMessage::new(0, 3, small_map(), rules));
        let value = serde_json::to_value(msg).unwrap();

        assert_eq!(value["settings"], json!({"futures": true, "splurges": true}));
    }

    #[test]
    fn test_move_request_shape() {
        let msg = ServerMessage::move_request(vec![MoveEntry::pass(0), MoveEntry::pass(1)]);
        let value = serde_json::to_value(msg).unwrap();
        assert_eq!(
            value,
            json!({"move": {"moves": [{"pass": {"punter": 0}}, {"pass": {"punter": 1}}]}})
        );
    }

    #[test]
    fn test_stop_shape() {
        let msg = ServerMessage::stop(
            vec![MoveEntry::pass(1)],
            vec![PunterScore { punter: 0, score: 1 }, PunterScore { punter: 1, score: 0 }],
        );
        let value = serde_json::to_value(msg).unwrap();
        assert_eq!(
            value,
            json!({"stop": {
                "moves": [{"pass": {"punter": 1}}],
                "scores": [{"punter": 0, "score": 1}, {"punter": 1, "score": 0}]
            }})
        );
    }

    #[test]
    fn test_timeout_shape() {
        let value = serde_json::to_value(ServerMessage::timeout(1.5)).unwrap();
        assert_eq!(value, json!({"timeout": 1.5}));
    }

    #[test]
    fn test_parse_handshake() {
        assert_eq!(parse_handshake(&json!({"me": "bob"})), Some("bob".to_string()));
        assert_eq!(parse_handshake(&json!({"me": 7})), Some("7".to_string()));
        assert_eq!(parse_handshake(&json!({"ready": 0})), None);
    }

    #[test]
    fn test_parse_ready() {
        assert_eq!(parse_ready(&json!({"ready": 0})), Some(vec![]));
        assert_eq!(parse_ready(&json!({"me": "x"})), None);

        let futures = parse_ready(&json!({
            "ready": 0,
            "futures": [{"source": 0, "target": 3}, {"source": "x"}, 5]
        }))
        .unwrap();
        assert_eq!(futures, vec![FutureBet { source: 0, target: 3 }]);

        assert_eq!(parse_ready(&json!({"ready": 0, "futures": "all"})), Some(vec![]));
    }

    #[test]
    fn test_parse_move_kinds() {
        assert_eq!(
            parse_move(&json!({"claim": {"punter": 0, "source": 1, "target": 2}})),
            ClientMove::Claim(River::new(1, 2))
        );
        assert_eq!(
            parse_move(&json!({"option": {"source": 2, "target": 1}})),
            ClientMove::OptionRiver(River::new(2, 1))
        );
        assert_eq!(
            parse_move(&json!({"splurge": {"route": [0, 1, 2]}})),
            ClientMove::Splurge(vec![0, 1, 2])
        );
        assert_eq!(parse_move(&json!({"pass": {}})), ClientMove::Pass);
    }

    #[test]
    fn test_parse_move_precedence() {
        let message = json!({
            "splurge": {"route": [0, 1]},
            "option": {"source": 3, "target": 4},
            "claim": {"source": 1, "target": 2}
        });
        assert_eq!(parse_move(&message), ClientMove::Claim(River::new(1, 2)));
    }

    #[test]
    fn test_malformed_moves_are_passes() {
        assert_eq!(parse_move(&json!({"claim": {"source": 1}})), ClientMove::Pass);
        assert_eq!(parse_move(&json!({"claim": "0-1"})), ClientMove::Pass);
        assert_eq!(parse_move(&json!({"splurge": {"route": [0, -1]}})), ClientMove::Pass);
        assert_eq!(parse_move(&json!({"hello": 1})), ClientMove::Pass);
        assert_eq!(parse_move(&json!([1, 2, 3])), ClientMove::Pass);
    }
}
