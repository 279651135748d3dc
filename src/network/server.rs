//! TCP Game Server
//!
//! Accepts punter connections and runs one match. Every connection gets a
//! reader task (bytes to frames to match commands) and a writer task (the
//! player's outbound queue to bytes). The match itself runs as a single actor
//! task that processes one command or timer at a time.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::game::map::MapInfo;
use crate::network::codec::{encode_frame, FrameDecoder, DEFAULT_MAX_FRAME_BYTES};
use crate::network::player::ConnId;
use crate::network::protocol::Outbound;
use crate::network::session::{MatchSession, MatchStats, SessionError};

/// Bytes requested per socket read.
const READ_CHUNK: usize = 4096;

/// Depth of the match command queue.
const COMMAND_QUEUE: usize = 1024;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host name or address to bind.
    pub host: String,
    /// TCP port; 0 picks a free one.
    pub port: u16,
    /// Largest accepted inbound payload.
    pub max_frame_bytes: usize,
}

impl ServerConfig {
    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind {addr}: {source}")]
    BindFailed {
        /// Requested address.
        addr: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Socket error outside a single connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Match task ended abnormally.
    #[error("Match task failed: {0}")]
    MatchTask(#[from] tokio::task::JoinError),
}

/// Commands processed by the match actor, in arrival order.
#[derive(Debug)]
pub enum MatchCommand {
    /// New connection asks for a seat.
    Register {
        /// Connection id.
        conn: ConnId,
        /// Queue drained by the connection's writer.
        outbound: mpsc::UnboundedSender<Outbound>,
        /// Registration result.
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// Decoded inbound message.
    Inbound {
        /// Connection id.
        conn: ConnId,
        /// Message payload.
        message: Value,
    },
    /// Socket closed or framing failed.
    Disconnected {
        /// Connection id.
        conn: ConnId,
    },
}

/// Read-only view of a running match, safe to use from any task.
#[derive(Debug, Clone)]
pub struct MatchHandle {
    stats: watch::Receiver<MatchStats>,
    map_info: Arc<MapInfo>,
}

impl MatchHandle {
    /// Latest stats snapshot.
    pub fn stats(&self) -> MatchStats {
        self.stats.borrow().clone()
    }

    /// Map summary.
    pub fn map_info(&self) -> &MapInfo {
        &self.map_info
    }

    /// Wait until the stats change. Returns false once the match is gone.
    pub async fn changed(&mut self) -> bool {
        self.stats.changed().await.is_ok()
    }
}

/// The game server: one listener, one match.
pub struct GameServer {
    config: ServerConfig,
    listener: TcpListener,
    session: MatchSession,
    stats_tx: watch::Sender<MatchStats>,
    handle: MatchHandle,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Bind the listener for a match.
    pub async fn bind(config: ServerConfig, session: MatchSession) -> Result<Self, GameServerError> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| GameServerError::BindFailed { addr, source })?;

        let (stats_tx, stats_rx) = watch::channel(session.stats());
        let handle = MatchHandle {
            stats: stats_rx,
            map_info: Arc::new(session.map().info()),
        };
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            listener,
            session,
            stats_tx,
            handle,
            shutdown_tx,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, GameServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for monitoring the match.
    pub fn handle(&self) -> MatchHandle {
        self.handle.clone()
    }

    /// Accept connections until the match closes. Returns the final stats.
    #[instrument(skip(self), fields(match_id = %self.session.id()))]
    pub async fn run(self) -> Result<MatchStats, GameServerError> {
        let Self {
            config,
            listener,
            session,
            stats_tx,
            shutdown_tx,
            ..
        } = self;

        info!("Game server listening on {}", listener.local_addr()?);

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let match_task = tokio::spawn(run_match(session, command_rx, stats_tx, shutdown_tx.clone()));

        let mut shutdown_rx = shutdown_tx.subscribe();
        let mut next_conn: ConnId = 0;

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            next_conn += 1;
                            debug!(conn = next_conn, %addr, "Accepted connection");
                            tokio::spawn(handle_connection(
                                stream,
                                addr,
                                next_conn,
                                command_tx.clone(),
                                config.max_frame_bytes,
                                shutdown_tx.subscribe(),
                            ));
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Match closed; no longer accepting connections");
                    break;
                }
            }
        }

        drop(listener);
        drop(command_tx);
        Ok(match_task.await?)
    }
}

/// The match actor: one command or timer at a time.
async fn run_match(
    mut session: MatchSession,
    mut commands: mpsc::Receiver<MatchCommand>,
    stats: watch::Sender<MatchStats>,
    shutdown: broadcast::Sender<()>,
) -> MatchStats {
    while !session.is_closed() {
        let deadline = session.next_deadline();
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                apply_command(&mut session, command);
            }
            _ = sleep_until(deadline) => {
                session.poll_timers(Instant::now());
            }
        }
        stats.send_replace(session.stats());
    }

    let _ = shutdown.send(());
    session.stats()
}

fn apply_command(session: &mut MatchSession, command: MatchCommand) {
    let now = Instant::now();
    match command {
        MatchCommand::Register { conn, outbound, reply } => {
            let _ = reply.send(session.register(conn, outbound, now));
        }
        MatchCommand::Inbound { conn, message } => {
            #[cfg(feature = "debug-tracing")]
            debug!(conn, %message, "Inbound message");
            session.handle_message(conn, &message, now);
        }
        MatchCommand::Disconnected { conn } => session.handle_disconnect(conn, now),
    }
}

fn sleep_until(deadline: Option<Instant>) -> impl Future<Output = ()> {
    async move {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

/// Register a connection with the match, then pump it until either side
/// closes.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    conn: ConnId,
    commands: mpsc::Sender<MatchCommand>,
    max_frame_bytes: usize,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = oneshot::channel();
    let register = MatchCommand::Register {
        conn,
        outbound: outbound_tx,
        reply: reply_tx,
    };

    if commands.send(register).await.is_err() {
        debug!(conn, %addr, "Match gone; dropping connection");
        return;
    }
    match reply_rx.await {
        Ok(Ok(())) => info!(conn, %addr, "Player connected"),
        Ok(Err(e)) => {
            warn!(conn, %addr, "Rejecting connection: {}", e);
            return;
        }
        Err(_) => return,
    }

    let (reader, writer) = stream.into_split();
    let (closed_tx, mut closed_rx) = oneshot::channel();
    let writer_task = tokio::spawn(write_loop(writer, outbound_rx, conn, closed_tx));

    tokio::select! {
        _ = read_loop(reader, conn, &commands, max_frame_bytes) => {}
        _ = &mut closed_rx => {}
        _ = shutdown_rx.recv() => {}
    }

    let _ = commands.send(MatchCommand::Disconnected { conn }).await;
    let _ = writer_task.await;
    debug!(conn, %addr, "Connection cleaned up");
}

/// Decode frames and forward them to the match until EOF or a framing error.
async fn read_loop(
    mut reader: OwnedReadHalf,
    conn: ConnId,
    commands: &mpsc::Sender<MatchCommand>,
    max_frame_bytes: usize,
) {
    let mut decoder = FrameDecoder::new(max_frame_bytes);
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                debug!(conn, "Peer closed connection");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                debug!(conn, "Read error: {}", e);
                return;
            }
        };

        decoder.extend(&buf[..n]);
        for message in decoder.messages() {
            match message {
                Ok(message) => {
                    if commands.send(MatchCommand::Inbound { conn, message }).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!(conn, "Framing error, closing connection: {}", e);
                    return;
                }
            }
        }
    }
}

/// Write queued messages until the match asks to close. Write errors are
/// logged and otherwise ignored.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    conn: ConnId,
    closed: oneshot::Sender<()>,
) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Message(message) => {
                let frame = match encode_frame(&message) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!(conn, "Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = writer.write_all(&frame).await {
                    warn!(conn, "Write failed: {}", e);
                }
            }
            Outbound::Close => break,
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!(conn, "Shutdown failed: {}", e);
    }
    let _ = closed.send(());
}

// =============================================================================
// TESTS
// =============================================================================
