//! Match Session
//!
//! The match orchestrator. Owns every `Player` and the `Board`, and drives
//! the match through handshake, setup, gameplay and scoring. All mutation
//! happens through `&mut self` calls made by a single actor task, so the
//! session itself holds no locks and never touches a socket.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::rng::Shuffler;
use crate::game::board::{Board, ClientMove, PunterId, PunterScore, Rules, TurnOutcome};
use crate::game::map::{FutureBet, GameMap};
use crate::network::player::{
    ConnId, MoveRequest, Player, PlayerEvent, PlayerPhase, TimerKind, Timeouts, DEFAULT_TIMEOUT_BUDGET,
};
use crate::network::protocol::{Outbound, ServerMessage, SetupMessage};

/// Match phase. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPhase {
    /// Accepting connections and handshakes.
    Handshake,
    /// Setup sent; waiting for every ready.
    Setup,
    /// Turns in progress.
    Gameplay,
    /// Scores computed; match closed.
    Scoring,
}

/// Configuration for one match.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Seats in the match. Setup starts once this many have shaken hands.
    pub punters: usize,
    /// Enabled optional rules.
    pub rules: Rules,
    /// Per-phase timer durations.
    pub timeouts: Timeouts,
    /// Timeouts tolerated per player before it turns zombie.
    pub timeout_budget: u32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            punters: 2,
            rules: Rules::default(),
            timeouts: Timeouts::default(),
            timeout_budget: DEFAULT_TIMEOUT_BUDGET,
        }
    }
}

/// Read-only snapshot for monitoring.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchStats {
    /// Match identifier.
    pub match_id: Uuid,
    /// When the match was created.
    pub started_at: DateTime<Utc>,
    /// Current phase.
    pub phase: MatchPhase,
    /// Committed turns.
    pub turn: usize,
    /// Total turns (river count).
    pub turn_limit: usize,
    /// Registered players.
    pub players: usize,
    /// Seats in the match.
    pub max_players: usize,
    /// Players that have turned zombie.
    pub zombies: usize,
    /// Final scores, once in `Scoring`.
    pub scores: Vec<PunterScore>,
}

/// Reasons a connection is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Every seat is taken.
    #[error("Match is full")]
    SessionFull,

    /// Connection already registered.
    #[error("Connection {0} already registered")]
    AlreadyRegistered(ConnId),

    /// Handshake phase is over.
    #[error("Match in progress")]
    MatchInProgress,

    /// Match has finished.
    #[error("Match closed")]
    MatchClosed,
}

/// A single match.
pub struct MatchSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    config: MatchConfig,
    map: Arc<GameMap>,
    phase: MatchPhase,
    /// Registration order until setup, then turn order (index == punter id).
    players: Vec<Player>,
    board: Option<Board>,
    futures: Vec<Vec<FutureBet>>,
    scores: Vec<PunterScore>,
    shuffler: Shuffler,
    closed: bool,
}

impl MatchSession {
    /// Create a match that shuffles seats with the OS random source.
    pub fn new(map: Arc<GameMap>, config: MatchConfig) -> Self {
        Self::with_shuffler(map, config, Shuffler::from_os())
    }

    /// Create a match with an explicit seat shuffler.
    pub fn with_shuffler(map: Arc<GameMap>, config: MatchConfig, shuffler: Shuffler) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            config,
            map,
            phase: MatchPhase::Handshake,
            players: Vec::new(),
            board: None,
            futures: Vec::new(),
            scores: Vec::new(),
            shuffler,
            closed: false,
        }
    }

    /// Match identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current phase.
    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    /// Map being played.
    pub fn map(&self) -> &Arc<GameMap> {
        &self.map
    }

    /// Match configuration.
    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Registered players.
    pub fn players(&self) -> &[Player] {
        &self.players
    }

    /// Board, once gameplay has started.
    pub fn board(&self) -> Option<&Board> {
        self.board.as_ref()
    }

    /// Final scores (empty before scoring).
    pub fn scores(&self) -> &[PunterScore] {
        &self.scores
    }

    /// Whether the match is over and every connection closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Punter id assigned to a connection.
    pub fn punter_of(&self, conn: ConnId) -> Option<PunterId> {
        self.players.iter().find(|p| p.conn() == conn)?.punter()
    }

    /// Register a new connection.
    pub fn register(
        &mut self,
        conn: ConnId,
        outbound: mpsc::UnboundedSender<Outbound>,
        now: Instant,
    ) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::MatchClosed);
        }
        if self.phase != MatchPhase::Handshake {
            return Err(SessionError::MatchInProgress);
        }
        if self.players.len() >= self.config.punters {
            return Err(SessionError::SessionFull);
        }
        if self.index_of(conn).is_some() {
            return Err(SessionError::AlreadyRegistered(conn));
        }

        self.players.push(Player::new(
            conn,
            outbound,
            self.config.timeouts,
            self.config.timeout_budget,
            now,
        ));
        debug!(conn, registered = self.players.len(), "Player registered");
        Ok(())
    }

    /// Route a decoded inbound message.
    pub fn handle_message(&mut self, conn: ConnId, message: &Value, now: Instant) {
        let Some(idx) = self.index_of(conn) else {
            return;
        };
        let Some(event) = self.players[idx].receive(message) else {
            return;
        };

        match event {
            PlayerEvent::Handshake(name) => self.on_handshake(idx, name, now),
            PlayerEvent::Ready(futures) => self.on_ready(idx, futures, now),
            PlayerEvent::Move(mv) => {
                if self.phase == MatchPhase::Gameplay {
                    if let Some(punter) = self.players[idx].punter() {
                        self.commit(punter, mv, now);
                    }
                }
            }
        }
    }

    /// Connection dropped or kicked. Safe to call more than once.
    ///
    /// Before setup the player is removed. From setup on the seat is kept
    /// and the player auto-passes.
    pub fn handle_disconnect(&mut self, conn: ConnId, now: Instant) {
        let Some(idx) = self.index_of(conn) else {
            return;
        };
        let newly_closed = self.players[idx].close();

        if self.phase == MatchPhase::Handshake {
            self.players.remove(idx);
            info!(conn, remaining = self.players.len(), "Player left before setup");
            return;
        }
        if !newly_closed {
            return;
        }

        let punter = self.players[idx].punter();
        info!(conn, ?punter, "Player disconnected; seat kept");
        match self.phase {
            MatchPhase::Setup => self.try_start(now),
            MatchPhase::Gameplay => {
                let active = self.board.as_ref().map(Board::active_punter);
                if let Some(punter) = punter.filter(|p| Some(*p) == active) {
                    self.commit(punter, ClientMove::Pass, now);
                }
            }
            _ => {}
        }
    }

    /// Fire every timer whose deadline has passed.
    pub fn poll_timers(&mut self, now: Instant) {
        let due: Vec<ConnId> = self
            .players
            .iter()
            .filter(|p| p.deadline().is_some_and(|d| d <= now))
            .map(Player::conn)
            .collect();

        for conn in due {
            let Some(idx) = self.index_of(conn) else {
                continue;
            };
            if let Some(kind) = self.players[idx].expire(now) {
                self.on_timeout(idx, kind, now);
            }
        }
    }

    /// Earliest armed timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.players.iter().filter_map(Player::deadline).min()
    }

    /// Monitoring snapshot.
    pub fn stats(&self) -> MatchStats {
        MatchStats {
            match_id: self.id,
            started_at: self.started_at,
            phase: self.phase,
            turn: self.board.as_ref().map_or(0, Board::turn_count),
            turn_limit: self.map.river_count(),
            players: self.players.len(),
            max_players: self.config.punters,
            zombies: self.players.iter().filter(|p| p.is_zombie()).count(),
            scores: self.scores.clone(),
        }
    }

    fn index_of(&self, conn: ConnId) -> Option<usize> {
        self.players.iter().position(|p| p.conn() == conn)
    }

    fn on_handshake(&mut self, idx: usize, name: String, now: Instant) {
        let conn = self.players[idx].conn();
        if self.phase != MatchPhase::Handshake {
            warn!(conn, name = %name, "Handshake after setup; kicking");
            self.handle_disconnect(conn, now);
            return;
        }
        info!(conn, name = %name, "Handshake");
        self.players[idx].acknowledge_handshake();
        self.try_setup(now);
    }

    fn on_ready(&mut self, idx: usize, futures: Vec<FutureBet>, now: Instant) {
        let conn = self.players[idx].conn();
        if self.phase != MatchPhase::Setup {
            warn!(conn, "Ready outside of setup; kicking");
            self.handle_disconnect(conn, now);
            return;
        }
        if let Some(punter) = self.players[idx].punter() {
            if self.config.rules.futures {
                let kept = self.map.validate_futures(&futures);
                debug!(punter, declared = futures.len(), kept = kept.len(), "Futures");
                self.futures[punter] = kept;
            }
            debug!(punter, "Ready");
        }
        self.try_start(now);
    }

    fn on_timeout(&mut self, idx: usize, kind: TimerKind, now: Instant) {
        let player = &self.players[idx];
        let conn = player.conn();
        let punter = player.punter();
        info!(conn, ?punter, ?kind, timeouts_left = player.timeouts_left(), "Timeout");

        player.send(ServerMessage::timeout(self.config.timeouts.of(kind).as_secs_f64()));

        match kind {
            TimerKind::Handshake => self.handle_disconnect(conn, now),
            TimerKind::Setup => {
                self.players[idx].force_ready();
                self.try_start(now);
            }
            TimerKind::Move => {
                if let Some(punter) = punter {
                    self.commit(punter, ClientMove::Pass, now);
                }
            }
        }
    }

    fn try_setup(&mut self, now: Instant) {
        let everyone_in = self.players.len() == self.config.punters
            && self.players.iter().all(|p| p.phase() == PlayerPhase::Setup);
        if self.phase != MatchPhase::Handshake || !everyone_in {
            return;
        }

        self.phase = MatchPhase::Setup;
        self.shuffler.shuffle(&mut self.players);

        let punters = self.players.len();
        self.futures = vec![Vec::new(); punters];
        let order: Vec<&str> = self.players.iter().map(Player::name).collect();
        info!(match_id = %self.id, ?order, "Setup");

        for (punter, player) in self.players.iter_mut().enumerate() {
            let setup = SetupMessage::new(punter, punters, self.map.data().clone(), self.config.rules);
            player.deliver_setup(setup, now);
        }
    }

    fn try_start(&mut self, now: Instant) {
        let all_ready = self
            .players
            .iter()
            .all(|p| matches!(p.phase(), PlayerPhase::Gameplay | PlayerPhase::Closed));
        if self.phase != MatchPhase::Setup || !all_ready {
            return;
        }

        self.phase = MatchPhase::Gameplay;
        let board = Board::new(self.map.clone(), self.players.len(), self.config.rules);
        info!(match_id = %self.id, turn_limit = board.turn_limit(), "Gameplay started");
        let finished = board.is_finished();
        self.board = Some(board);

        if finished {
            self.stop_game();
        } else {
            self.request_next_move(now);
        }
    }

    fn commit(&mut self, punter: PunterId, mv: ClientMove, now: Instant) {
        let Some(board) = self.board.as_mut() else {
            return;
        };
        match board.commit(punter, &mv) {
            Ok((_, TurnOutcome::Finished)) => self.stop_game(),
            Ok((_, TurnOutcome::Next(_))) => self.request_next_move(now),
            Err(e) => debug!(punter, error = %e, "Move not committed"),
        }
    }

    /// Ask the active punter for a move, auto-passing for those that cannot
    /// answer until someone can or the game ends.
    fn request_next_move(&mut self, now: Instant) {
        loop {
            let Some(board) = self.board.as_mut() else {
                return;
            };
            let active = board.active_punter();
            let request = self.players[active].request_move(board.recent_moves(), now);
            if request == MoveRequest::Awaiting {
                return;
            }

            match board.commit(active, &ClientMove::Pass) {
                Ok((_, TurnOutcome::Next(_))) => continue,
                Ok((_, TurnOutcome::Finished)) => {
                    self.stop_game();
                    return;
                }
                Err(e) => {
                    debug!(punter = active, error = %e, "Auto-pass not committed");
                    return;
                }
            }
        }
    }

    fn stop_game(&mut self) {
        let Some(board) = self.board.as_ref() else {
            return;
        };
        self.phase = MatchPhase::Scoring;
        self.scores = board.scores(&self.futures);
        let moves = board.recent_moves();

        for score in &self.scores {
            let name = self.players.get(score.punter).map_or("", Player::name);
            info!(punter = score.punter, name = %name, score = score.score, "Final score");
        }
        for player in &mut self.players {
            player.stop(ServerMessage::stop(moves.clone(), self.scores.clone()));
        }
        self.close();
    }

    fn close(&mut self) {
        for player in &mut self.players {
            player.close();
        }
        self.closed = true;
        info!(match_id = %self.id, "Match closed");
    }
}

// =============================================================================
// TESTS
// =============================================================================
