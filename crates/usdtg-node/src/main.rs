#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod genesis;

use std::fs;
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use usdtg_core::{PROTOCOL_VERSION, USDTG_DECIMALS, USDTG_SYMBOL};
use usdtg_p2p::transport::{dial, serve_incoming};
use usdtg_p2p::{Direction, MessageType, NetworkConfig, NetworkManager, NetworkMessage};
use usdtg_state::WorldState;

/// Main loop granularity.
const TICK: Duration = Duration::from_secs(1);
/// Status, audit and redial cadence.
const STATUS_INTERVAL: Duration = Duration::from_secs(60);
/// Minimum gap between redials triggered by departing peers.
const REDIAL_BACKOFF: Duration = Duration::from_secs(10);

/// Node configuration; flags override environment variables.
#[derive(Parser, Debug)]
#[command(name = "usdtg-node", version)]
struct Config {
    /// Listen address for P2P
    #[arg(long = "listen", env = "USDTG_LISTEN", default_value = "0.0.0.0:26656")]
    listen: SocketAddr,
    /// Peers to dial, comma separated ip:port list
    #[arg(long = "peers", env = "USDTG_PEERS")]
    peers: Option<String>,
    /// Genesis allocations (JSON); built-in devnet allocations when absent
    #[arg(long = "genesis", env = "USDTG_GENESIS")]
    genesis: Option<PathBuf>,
    /// Network tunables (JSON); missing fields keep their defaults
    #[arg(long = "network-config", env = "USDTG_NETWORK_CONFIG")]
    network_config: Option<PathBuf>,
    /// Peer table capacity
    #[arg(long = "max-peers", env = "USDTG_MAX_PEERS")]
    max_peers: Option<usize>,
    /// Log filter, e.g. `info` or `usdtg_p2p=debug`
    #[arg(long = "log-level", env = "USDTG_LOG")]
    log_level: Option<String>,
}

struct ResolvedConfig {
    listen: SocketAddr,
    peers: Vec<SocketAddr>,
    genesis: Option<PathBuf>,
    network: NetworkConfig,
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let cfg = resolve_config(Config::parse())?;
    init_tracing(cfg.log_level.as_deref())?;
    info!(version = PROTOCOL_VERSION, "starting USDTg node");

    let state = match &cfg.genesis {
        Some(path) => genesis::load_genesis(path)?,
        None => {
            warn!("no genesis file configured, using devnet allocations");
            genesis::devnet_state()?
        }
    };
    state.verify_invariants().context("genesis state is inconsistent")?;
    info!(
        accounts = state.account_count(),
        root = %state.state_root()?,
        "ledger ready"
    );
    info!("\n{}", state.summary());

    let manager = NetworkManager::new(cfg.network.clone());
    manager.set_message_handler(|peer, msg| match msg.kind {
        // Applying remote transactions is up to a consensus/mempool layer.
        MessageType::Transaction => info!(%peer, bytes = msg.payload.len(), "transaction received"),
        MessageType::PeerList => match msg.endpoints() {
            Ok(list) => debug!(%peer, known = list.len(), "peer list received"),
            Err(e) => debug!(%peer, "bad peer list: {e}"),
        },
        kind => debug!(%peer, %kind, "message received"),
    });
    // An outbound peer dropping out brings the next redial forward.
    let redial_due = Arc::new(AtomicBool::new(false));
    manager.set_peer_connected_handler(|info| {
        info!(peer = %info.peer_id, addr = %info.endpoint(), "peer connected");
    });
    {
        let redial_due = Arc::clone(&redial_due);
        manager.set_peer_disconnected_handler(move |info| {
            info!(peer = %info.peer_id, addr = %info.endpoint(), state = %info.state, "peer left");
            if info.direction == Direction::Outbound {
                redial_due.store(true, Ordering::Release);
            }
        });
    }
    manager
        .try_start(cfg.listen.port())
        .context("starting network manager")?;

    let listener = TcpListener::bind(cfg.listen)
        .with_context(|| format!("binding p2p socket {}", cfg.listen))?;
    serve_incoming(&manager, listener)?;
    redial(&manager, &cfg.peers);

    let result = run(&manager, &state, &cfg, &redial_due);
    manager.stop();
    result
}

fn run(
    manager: &NetworkManager,
    state: &WorldState,
    cfg: &ResolvedConfig,
    redial_due: &AtomicBool,
) -> Result<()> {
    let mut last_heartbeat = Instant::now();
    let mut last_status = Instant::now();
    let mut last_redial = Instant::now();
    loop {
        thread::sleep(TICK);
        let now = Instant::now();
        manager.maintain(now);

        if now.duration_since(last_heartbeat) >= cfg.network.heartbeat_interval() {
            manager.broadcast(&NetworkMessage::heartbeat());
            last_heartbeat = now;
        }

        if now.duration_since(last_status) >= STATUS_INTERVAL {
            last_status = now;
            info!("\n{}", manager.status_summary());
            let summary = state.summary();
            info!(
                accounts = summary.accounts,
                supply = %summary.native_supply.format_units(USDTG_DECIMALS),
                symbol = USDTG_SYMBOL,
                "ledger status"
            );
            if let Err(e) = state.verify_invariants() {
                error!("ledger audit failed: {e}");
                return Err(e).context("ledger corrupted, shutting down");
            }
            redial(manager, &cfg.peers);
            last_redial = now;
        } else if now.duration_since(last_redial) >= REDIAL_BACKOFF
            && redial_due.swap(false, Ordering::AcqRel)
        {
            redial(manager, &cfg.peers);
            last_redial = now;
        }
    }
}

/// Dial configured peers that are not currently in the table.
fn redial(manager: &NetworkManager, peers: &[SocketAddr]) {
    let live = manager.peers();
    for addr in peers {
        let ip = addr.ip().to_string();
        if live.iter().any(|p| p.ip_address == ip && p.port == addr.port()) {
            continue;
        }
        match dial(manager, *addr) {
            Ok(peer) => info!(%peer, %addr, "dialed peer"),
            Err(e) => warn!(%addr, "dial failed: {e}"),
        }
    }
}

fn init_tracing(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).context("invalid log filter")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
    Ok(())
}

fn resolve_config(cli: Config) -> Result<ResolvedConfig> {
    let peers = parse_peers(cli.peers.as_deref().unwrap_or_default())?;

    let mut network = match cli.network_config {
        Some(path) => {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("reading network config {}", path.display()))?;
            serde_json::from_str::<NetworkConfig>(&raw).context("parsing network config")?
        }
        None => NetworkConfig::default(),
    };
    if let Some(max) = cli.max_peers {
        network.max_peers = max;
    }
    network.validate()?;

    Ok(ResolvedConfig {
        listen: cli.listen,
        peers,
        genesis: cli.genesis,
        network,
        log_level: cli.log_level,
    })
}

fn parse_peers(raw: &str) -> Result<Vec<SocketAddr>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<SocketAddr>().with_context(|| format!("invalid peer address {s:?}")))
        .collect()
}
