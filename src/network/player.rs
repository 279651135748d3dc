//! Player State Machine
//!
//! One `Player` per connection, owned by the match. It tracks the protocol
//! phase, the single armed timer, and the timeout budget. It never touches
//! match state: inbound frames become [`PlayerEvent`]s for the match, and
//! outbound messages go onto the connection's queue.
//!
//! Timers are plain deadlines. The match polls [`Player::expire`] with the
//! current instant, so the machine can be driven without a runtime.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::game::board::{ClientMove, MoveEntry, PunterId};
use crate::game::map::FutureBet;
use crate::network::protocol::{self, Outbound, ServerMessage, SetupMessage};

/// Connection sequence number, assigned at accept.
pub type ConnId = u64;

/// Default number of timeouts tolerated before a player turns zombie.
pub const DEFAULT_TIMEOUT_BUDGET: u32 = 10;

/// Per-phase timer durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Time allowed to send `{"me": ...}`.
    pub handshake: Duration,
    /// Time allowed to answer setup with `{"ready": ...}`.
    pub setup: Duration,
    /// Time allowed per move.
    pub moves: Duration,
}

impl Timeouts {
    /// Duration of a given timer.
    pub fn of(&self, kind: TimerKind) -> Duration {
        match kind {
            TimerKind::Handshake => self.handshake,
            TimerKind::Setup => self.setup,
            TimerKind::Move => self.moves,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(1),
            setup: Duration::from_secs(10),
            moves: Duration::from_secs(1),
        }
    }
}

/// Protocol phase of one player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerPhase {
    /// Waiting for `{"me": ...}`.
    Handshake,
    /// Acknowledged; waiting for setup and then `{"ready": ...}`.
    Setup,
    /// Ready; takes moves when asked.
    Gameplay,
    /// Stop message delivered.
    Scoring,
    /// Disconnected or kicked.
    Closed,
}

/// Which timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Handshake timer.
    Handshake,
    /// Setup timer.
    Setup,
    /// Move timer.
    Move,
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    kind: TimerKind,
    deadline: Instant,
}

/// Event raised by an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    /// Client declared its name.
    Handshake(String),
    /// Client is ready, with raw (unvalidated) futures.
    Ready(Vec<FutureBet>),
    /// Client answered a move request.
    Move(ClientMove),
}

/// Result of asking a player for a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveRequest {
    /// Request sent; the move timer is armed.
    Awaiting,
    /// Player cannot answer (zombie or closed); commit a pass for it.
    AutoPass,
}

/// Protocol state of one connected punter.
#[derive(Debug)]
pub struct Player {
    conn: ConnId,
    punter: Option<PunterId>,
    name: String,
    phase: PlayerPhase,
    zombie: bool,
    timeouts_left: u32,
    timer: Option<Timer>,
    awaiting_move: bool,
    timeouts: Timeouts,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Player {
    /// New player in `Handshake` with the handshake timer armed.
    pub fn new(
        conn: ConnId,
        outbound: mpsc::UnboundedSender<Outbound>,
        timeouts: Timeouts,
        timeout_budget: u32,
        now: Instant,
    ) -> Self {
        let mut player = Self {
            conn,
            punter: None,
            name: String::new(),
            phase: PlayerPhase::Handshake,
            zombie: false,
            timeouts_left: timeout_budget,
            timer: None,
            awaiting_move: false,
            timeouts,
            outbound,
        };
        player.arm(TimerKind::Handshake, now);
        player
    }

    /// Connection this player is bound to.
    pub fn conn(&self) -> ConnId {
        self.conn
    }

    /// Id assigned at setup.
    pub fn punter(&self) -> Option<PunterId> {
        self.punter
    }

    /// Name declared at handshake (empty before).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current phase.
    pub fn phase(&self) -> PlayerPhase {
        self.phase
    }

    /// Whether the player has exhausted its timeout budget.
    pub fn is_zombie(&self) -> bool {
        self.zombie
    }

    /// Whether the connection is gone.
    pub fn is_closed(&self) -> bool {
        self.phase == PlayerPhase::Closed
    }

    /// Timeouts still tolerated before turning zombie.
    pub fn timeouts_left(&self) -> u32 {
        self.timeouts_left
    }

    /// Deadline of the armed timer.
    pub fn deadline(&self) -> Option<Instant> {
        self.timer.map(|t| t.deadline)
    }

    /// Interpret an inbound message for the current phase.
    ///
    /// Messages that do not fit the phase are ignored.
    pub fn receive(&mut self, message: &Value) -> Option<PlayerEvent> {
        match self.phase {
            PlayerPhase::Handshake => {
                let name = protocol::parse_handshake(message)?;
                self.timer = None;
                self.name = name.clone();
                Some(PlayerEvent::Handshake(name))
            }
            PlayerPhase::Setup => {
                let futures = protocol::parse_ready(message)?;
                self.timer = None;
                self.phase = PlayerPhase::Gameplay;
                Some(PlayerEvent::Ready(futures))
            }
            PlayerPhase::Gameplay if self.awaiting_move => {
                self.timer = None;
                self.awaiting_move = false;
                Some(PlayerEvent::Move(protocol::parse_move(message)))
            }
            PlayerPhase::Gameplay => {
                debug!(conn = self.conn, "Ignoring message outside of own turn");
                None
            }
            PlayerPhase::Scoring | PlayerPhase::Closed => None,
        }
    }

    /// Acknowledge the handshake and move to `Setup`.
    pub fn acknowledge_handshake(&mut self) {
        if self.phase != PlayerPhase::Handshake {
            return;
        }
        self.phase = PlayerPhase::Setup;
        self.send(ServerMessage::you(self.name.clone()));
    }

    /// Record the assigned id, send the setup payload and arm the setup timer.
    pub fn deliver_setup(&mut self, setup: SetupMessage, now: Instant) {
        self.punter = Some(setup.punter);
        if self.phase != PlayerPhase::Setup {
            return;
        }
        self.arm(TimerKind::Setup, now);
        self.send(ServerMessage::Setup(setup));
    }

    /// Treat the player as ready without a message (setup timeout).
    pub fn force_ready(&mut self) {
        if self.phase == PlayerPhase::Setup {
            self.timer = None;
            self.phase = PlayerPhase::Gameplay;
        }
    }

    /// Ask for a move, or report that a pass must be synthesized.
    pub fn request_move(&mut self, moves: Vec<MoveEntry>, now: Instant) -> MoveRequest {
        if self.zombie || self.phase != PlayerPhase::Gameplay {
            return MoveRequest::AutoPass;
        }
        self.awaiting_move = true;
        self.arm(TimerKind::Move, now);
        self.send(ServerMessage::move_request(moves));
        MoveRequest::Awaiting
    }

    /// Deliver the stop message; no further input is read.
    pub fn stop(&mut self, message: ServerMessage) {
        if self.is_closed() {
            return;
        }
        self.timer = None;
        self.awaiting_move = false;
        self.phase = PlayerPhase::Scoring;
        self.send(message);
    }

    /// Fire the armed timer if its deadline has passed.
    ///
    /// Each firing spends one unit of the timeout budget; spending the last
    /// unit makes the player a zombie for good.
    pub fn expire(&mut self, now: Instant) -> Option<TimerKind> {
        let timer = self.timer.filter(|t| t.deadline <= now)?;
        self.timer = None;
        if timer.kind == TimerKind::Move {
            self.awaiting_move = false;
        }

        self.timeouts_left = self.timeouts_left.saturating_sub(1);
        if self.timeouts_left == 0 && !self.zombie {
            self.zombie = true;
            warn!(conn = self.conn, punter = ?self.punter, name = %self.name, "Player is now a zombie");
        }
        Some(timer.kind)
    }

    /// Close the connection. Returns false if it was already closed.
    pub fn close(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.phase = PlayerPhase::Closed;
        self.timer = None;
        self.awaiting_move = false;
        let _ = self.outbound.send(Outbound::Close);
        true
    }

    /// Queue a message, unless the player is a zombie or closed.
    pub fn send(&self, message: ServerMessage) {
        if self.zombie || self.is_closed() {
            return;
        }
        if self.outbound.send(Outbound::Message(message)).is_err() {
            debug!(conn = self.conn, "Outbound queue already dropped");
        }
    }

    fn arm(&mut self, kind: TimerKind, now: Instant) {
        self.timer = Some(Timer {
            kind,
            deadline: now + self.timeouts.of(kind),
        });
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::board::Rules;
    use crate::game::map::{MapData, River};
    use serde_json::json;

    fn player(budget: u32) -> (Player, mpsc::UnboundedReceiver<Outbound>, Instant) {
        let (tx, rx) = mpsc::unbounded_channel();
        let now = Instant::now();
        (Player::new(7, tx, Timeouts::default(), budget, now), rx, now)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn to_gameplay(p: &mut Player, now: Instant) {
        p.receive(&json!({"me": "p"}));
        p.acknowledge_handshake();
        p.deliver_setup(SetupMessage::new(0, 2, MapData::default(), Rules::default()), now);
        p.receive(&json!({"ready": 0}));
    }

    #[test]
    fn test_new_player_arms_handshake_timer() {
        let (p, _rx, now) = player(10);
        assert_eq!(p.phase(), PlayerPhase::Handshake);
        assert_eq!(p.deadline(), Some(now + Duration::from_secs(1)));
        assert_eq!(p.punter(), None);
    }

    #[test]
    fn test_handshake_flow() {
        let (mut p, mut rx, _) = player(10);

        assert_eq!(p.receive(&json!({"ready": 0})), None);
        assert_eq!(p.receive(&json!({"me": "alice"})), Some(PlayerEvent::Handshake("alice".into())));
        assert_eq!(p.deadline(), None);

        p.acknowledge_handshake();
        assert_eq!(p.phase(), PlayerPhase::Setup);
        assert_eq!(drain(&mut rx), vec![Outbound::Message(ServerMessage::you("alice"))]);
    }

    #[test]
    fn test_setup_and_ready() {
        let (mut p, mut rx, now) = player(10);
        p.receive(&json!({"me": "alice"}));
        p.acknowledge_handshake();
        drain(&mut rx);

        let setup = SetupMessage::new(1, 2, MapData::default(), Rules::default());
        p.deliver_setup(setup.clone(), now);
        assert_eq!(p.punter(), Some(1));
        assert_eq!(p.deadline(), Some(now + Duration::from_secs(10)));
        assert_eq!(drain(&mut rx), vec![Outbound::Message(ServerMessage::Setup(setup))]);

        let event = p.receive(&json!({"ready": 1, "futures": [{"source": 0, "target": 1}]}));
        assert_eq!(event, Some(PlayerEvent::Ready(vec![FutureBet { source: 0, target: 1 }])));
        assert_eq!(p.phase(), PlayerPhase::Gameplay);
        assert_eq!(p.deadline(), None);
    }

    #[test]
    fn test_moves_only_accepted_when_requested() {
        let (mut p, mut rx, now) = player(10);
        to_gameplay(&mut p, now);
        drain(&mut rx);

        assert_eq!(p.receive(&json!({"claim": {"source": 0, "target": 1}})), None);

        assert_eq!(p.request_move(vec![MoveEntry::pass(1)], now), MoveRequest::Awaiting);
        assert_eq!(p.deadline(), Some(now + Duration::from_secs(1)));
        assert_eq!(
            drain(&mut rx),
            vec![Outbound::Message(ServerMessage::move_request(vec![MoveEntry::pass(1)]))]
        );

        assert_eq!(
            p.receive(&json!({"claim": {"source": 0, "target": 1}})),
            Some(PlayerEvent::Move(ClientMove::Claim(River::new(0, 1))))
        );
        assert_eq!(p.deadline(), None);
        // A second answer is not read.
        assert_eq!(p.receive(&json!({"pass": {}})), None);
    }

    #[test]
    fn test_timer_fires_only_after_deadline() {
        let (mut p, _rx, now) = player(10);
        assert_eq!(p.expire(now), None);
        assert_eq!(p.expire(now + Duration::from_secs(1)), Some(TimerKind::Handshake));
        assert_eq!(p.timeouts_left(), 9);
        assert_eq!(p.expire(now + Duration::from_secs(5)), None);
    }

    #[test]
    fn test_budget_exhaustion_makes_zombie() {
        let (mut p, mut rx, now) = player(3);
        to_gameplay(&mut p, now);
        drain(&mut rx);

        let mut t = now;
        for left in (0..3).rev() {
            assert_eq!(p.request_move(vec![], t), MoveRequest::Awaiting);
            t += Duration::from_secs(1);
            assert_eq!(p.expire(t), Some(TimerKind::Move));
            assert_eq!(p.timeouts_left(), left);
        }
        assert!(p.is_zombie());
        drain(&mut rx);

        assert_eq!(p.request_move(vec![], t), MoveRequest::AutoPass);
        assert_eq!(p.deadline(), None);
        p.send(ServerMessage::timeout(1.0));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut p, mut rx, now) = player(10);
        assert!(p.close());
        assert!(!p.close());
        assert_eq!(p.deadline(), None);
        assert_eq!(drain(&mut rx), vec![Outbound::Close]);

        assert_eq!(p.receive(&json!({"me": "late"})), None);
        assert_eq!(p.request_move(vec![], now), MoveRequest::AutoPass);
        p.send(ServerMessage::you("x"));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_stop_ends_input() {
        let (mut p, mut rx, now) = player(10);
        to_gameplay(&mut p, now);
        p.request_move(vec![], now);
        drain(&mut rx);

        let stop = ServerMessage::stop(vec![], vec![]);
        p.stop(stop.clone());
        assert_eq!(p.phase(), PlayerPhase::Scoring);
        assert_eq!(p.deadline(), None);
        assert_eq!(drain(&mut rx), vec![Outbound::Message(stop)]);
        assert_eq!(p.receive(&json!({"pass": {}})), None);
    }
}
