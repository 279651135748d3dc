//! Punter Server
//!
//! Loads a map, waits for the configured number of punters, referees one
//! match and exits.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use punter::{
    network::{codec::DEFAULT_MAX_FRAME_BYTES, player::Timeouts},
    GameMap, GameServer, MatchConfig, MatchSession, Rules, ServerConfig, VERSION,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Referee server for the punter river-claiming game")]
struct Args {
    /// Host to bind, optionally with a port (HOST[:PORT])
    #[arg(short, long, default_value = "localhost")]
    bind: String,

    /// Port to listen on; overrides a port given in --bind
    #[arg(short, long)]
    port: Option<u16>,

    /// Map file (JSON with sites, rivers and mines)
    #[arg(short, long, default_value = "maps/sample.json")]
    map: PathBuf,

    /// Number of punters in the match
    #[arg(short = 'n', long, default_value = "2", value_parser = clap::value_parser!(u16).range(1..))]
    players: u16,

    /// Enable futures
    #[arg(short, long)]
    futures: bool,

    /// Enable options
    #[arg(short, long)]
    options: bool,

    /// Enable splurges
    #[arg(short, long)]
    splurges: bool,

    /// Seconds allowed for the handshake
    #[arg(long, default_value = "1", value_parser = parse_seconds)]
    handshake_timeout: Duration,

    /// Seconds allowed to answer setup
    #[arg(long, default_value = "10", value_parser = parse_seconds)]
    setup_timeout: Duration,

    /// Seconds allowed per move
    #[arg(long, default_value = "1", value_parser = parse_seconds)]
    move_timeout: Duration,

    /// Timeouts tolerated before a punter turns zombie
    #[arg(long, default_value = "10")]
    timeout_budget: u32,

    /// Largest accepted inbound message, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    max_frame_bytes: usize,
}

impl Args {
    fn server_config(&self) -> Result<ServerConfig> {
        let (host, bound_port) = match self.bind.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => {
                let port = port
                    .parse()
                    .with_context(|| format!("invalid port in --bind {:?}", self.bind))?;
                (host.to_string(), Some(port))
            }
            _ => (self.bind.clone(), None),
        };
        let defaults = ServerConfig::default();
        Ok(ServerConfig {
            host,
            port: self.port.or(bound_port).unwrap_or(defaults.port),
            max_frame_bytes: self.max_frame_bytes,
        })
    }

    fn match_config(&self) -> MatchConfig {
        MatchConfig {
            punters: usize::from(self.players),
            rules: Rules {
                futures: self.futures,
                options: self.options,
                splurges: self.splurges,
            },
            timeouts: Timeouts {
                handshake: self.handshake_timeout,
                setup: self.setup_timeout,
                moves: self.move_timeout,
            },
            timeout_budget: self.timeout_budget,
        }
    }
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
    let secs: f64 = value.parse().map_err(|e| format!("{e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Punter Server v{}", VERSION);

    let map = GameMap::load(&args.map).with_context(|| format!("loading map {}", args.map.display()))?;
    let info = map.info();
    info!(
        name = %info.name,
        sites = info.sites,
        rivers = info.rivers,
        mines = info.mines,
        digest = %info.digest,
        "Map loaded"
    );

    let server_config = args.server_config()?;
    let match_config = args.match_config();
    info!(
        punters = match_config.punters,
        rules = ?match_config.rules,
        timeouts = ?match_config.timeouts,
        "Match configured"
    );

    let session = MatchSession::new(Arc::new(map), match_config);
    let server = GameServer::bind(server_config, session)
        .await
        .context("starting server")?;
    let stats = server.run().await?;

    info!(match_id = %stats.match_id, turns = stats.turn, zombies = stats.zombies, "Match finished");
    for score in &stats.scores {
        info!("Punter {}: {}", score.punter, score.score);
    }

    Ok(())
}
