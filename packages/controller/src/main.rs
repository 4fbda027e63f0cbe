//! main.rs — WeSquash controller entry point
//!
//! Streams handheld motion to the backend:
//!   1. Resolves the backend (`--server`, config `host`, or a discovery beacon)
//!   2. Connects through the orchestrator in the chosen mode
//!   3. Samples the synthetic sensor at `rate_hz` and submits every sample;
//!      the orchestrator coalesces and paces the actual sends
//!   4. Optionally asks for a calibration once the channel opens
//!
//! Operator commands on stdin, one per line: `c` calibrate, `p`/`f` switch to
//! primary/fallback, `r` resume (reconnect a dropped channel now).
//!
//! Runs until Ctrl-C or `--duration-secs` elapses. Transport failures are
//! logged and handled by the channels; nothing in the loop exits on them.

mod backoff;
mod config;
mod connection;
mod discovery;
mod orchestrator;
mod sensor_sim;
mod udp_channel;
mod ws_channel;

use std::net::IpAddr;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tracing::{info, warn};

use config::ControllerConfig;
use connection::{ServerEndpoint, TransportMode};
use discovery::DiscoveredServer;
use orchestrator::TransportOrchestrator;
use sensor_sim::SensorSim;

const HOUSEKEEPING: Duration = Duration::from_millis(50);
const STATUS_EVERY: Duration = Duration::from_secs(5);

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "wesquash-controller", about = "WeSquash handheld controller (synthetic sensor)")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    /// Backend IP; omit to use discovery
    #[arg(long)]
    server: Option<IpAddr>,
    /// Transport mode
    #[arg(long, value_enum)]
    mode: Option<TransportMode>,
    /// Fail over to WebSocket when UDP goes quiet
    #[arg(long)]
    auto_fallback: bool,
    /// Request a calibration as soon as the channel opens
    #[arg(long)]
    calibrate: bool,
    /// Sensor sample rate (Hz)
    #[arg(long)]
    rate_hz: Option<f64>,
    /// Seed the synthetic sensor for a reproducible stream
    #[arg(long)]
    seed: Option<u64>,
    /// Stop after this many seconds (0 = run until Ctrl-C)
    #[arg(long, default_value = "0")]
    duration_secs: u64,
}

impl Args {
    fn apply(&self, cfg: &mut ControllerConfig) {
        if let Some(server) = self.server {
            cfg.server.host = Some(server);
        }
        if let Some(mode) = self.mode {
            cfg.transport.mode = mode;
        }
        if self.auto_fallback {
            cfg.transport.auto_fallback = true;
        }
        if let Some(rate) = self.rate_hz {
            cfg.sensor.rate_hz = rate;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Calibrate,
    Mode(TransportMode),
    Resume,
}

impl Operator {
    fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "c" | "calibrate" => Some(Self::Calibrate),
            "p" | "primary" => Some(Self::Mode(TransportMode::Primary)),
            "f" | "fallback" => Some(Self::Mode(TransportMode::Fallback)),
            "r" | "resume" => Some(Self::Resume),
            _ => None,
        }
    }
}

/// Blocking stdin reader on its own thread; Tokio's stdin would hold up shutdown.
fn spawn_operator_input() -> mpsc::Receiver<Operator> {
    let (tx, rx) = mpsc::channel(8);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            match Operator::parse(&line) {
                Some(cmd) => {
                    if tx.blocking_send(cmd).is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => warn!("Unknown command {:?} (c, p, f, r)", line.trim()),
            }
        }
    });
    rx
}

fn endpoint_for(cfg: &ControllerConfig, host: IpAddr, udp_port: u16) -> ServerEndpoint {
    ServerEndpoint { host, udp_port, ws_port: cfg.server.ws_port }
}

/// Pending forever when nothing is scheduled.
async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at.into()).await,
        None => std::future::pending().await,
    }
}

async fn wait_for_beacon(rx: &mut watch::Receiver<Option<DiscoveredServer>>) -> anyhow::Result<DiscoveredServer> {
    info!("Waiting for a discovery beacon...");
    let found = rx.wait_for(Option::is_some).await.context("discovery listener stopped")?;
    found.context("discovery listener stopped")
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wesquash_controller=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut cfg = ControllerConfig::load(&args.config).context("loading controller config")?;
    args.apply(&mut cfg);
    cfg.validate().context("invalid controller config")?;

    info!(
        "🎾 WeSquash controller starting: mode {:?}, {} Hz, auto-fallback {}",
        cfg.transport.mode, cfg.sensor.rate_hz, cfg.transport.auto_fallback
    );

    // Without a fixed host, follow the beacon for the whole run.
    let (disc_tx, mut disc_rx) = watch::channel(None);
    if cfg.server.host.is_none() {
        let (port, ttl) = (cfg.server.discovery_port, cfg.discovery.ttl());
        tokio::spawn(async move {
            if let Err(e) = discovery::run(port, ttl, disc_tx).await {
                warn!("Discovery listener stopped: {e}");
            }
        });
    }

    let endpoint = match cfg.server.host {
        Some(host) => endpoint_for(&cfg, host, cfg.server.udp_port),
        None => {
            let found = wait_for_beacon(&mut disc_rx).await?;
            endpoint_for(&cfg, found.ip, found.port)
        }
    };

    let mut orch = TransportOrchestrator::new(&cfg);
    orch.connect(endpoint, Instant::now()).context("opening transport")?;

    let mut sim = match args.seed {
        Some(seed) => SensorSim::seeded(&cfg.sensor, seed),
        None => SensorSim::new(&cfg.sensor),
    };
    let mut operator = spawn_operator_input();
    let mut operator_open = true;
    let mut sampler = interval(cfg.sample_period());
    let mut housekeeping = interval(HOUSEKEEPING);
    let mut status_log = interval(STATUS_EVERY);
    let mut calibrate_pending = args.calibrate;
    let mut last_sample = Instant::now();
    let mut discovering = cfg.server.host.is_none();

    let deadline = (args.duration_secs > 0).then(|| Instant::now() + Duration::from_secs(args.duration_secs));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let flush_at = orch.next_flush_at();
        tokio::select! {
            _ = sampler.tick() => {
                let now = Instant::now();
                let dt = now.duration_since(last_sample).as_secs_f64();
                last_sample = now;
                orch.submit(sim.next(dt), now);
            }
            _ = housekeeping.tick() => {
                orch.tick(Instant::now());
                if calibrate_pending && orch.status().is_open() && orch.request_calibration() {
                    calibrate_pending = false;
                }
            }
            _ = sleep_until_opt(flush_at) => orch.tick(Instant::now()),
            changed = disc_rx.changed(), if discovering => {
                if changed.is_err() {
                    discovering = false;
                    continue;
                }
                let found = *disc_rx.borrow_and_update();
                if let Some(found) = found {
                    let moved = endpoint_for(&cfg, found.ip, found.port);
                    if orch.endpoint() != Some(moved) {
                        info!("Backend moved to {}:{}, reconnecting", found.ip, found.port);
                        if let Err(e) = orch.connect(moved, Instant::now()) {
                            warn!("Reconnect to {} failed: {e}", found.ip);
                        }
                    } else {
                        // Same backend back after a beacon gap.
                        orch.on_foreground(Instant::now());
                    }
                }
            }
            cmd = operator.recv(), if operator_open => match cmd {
                Some(Operator::Calibrate) => {
                    if !orch.request_calibration() {
                        warn!("Calibration not sent: channel not open");
                    }
                }
                Some(Operator::Mode(mode)) => {
                    info!("Operator: transport {:?} → {mode:?}", orch.mode());
                    if let Err(e) = orch.set_mode(mode, Instant::now()) {
                        warn!("Switch to {mode:?} failed: {e}");
                    }
                }
                Some(Operator::Resume) => orch.on_foreground(Instant::now()),
                None => operator_open = false,
            },
            _ = status_log.tick() => {
                let status = orch.status();
                let stats = orch.stats();
                info!(
                    "📊 {:?} {:?} latency={} reconnects={} sent={} coalesced={}",
                    status.mode,
                    status.state,
                    status.latency_ms.map_or("-".to_string(), |l| format!("{l:.1}ms")),
                    status.reconnect_attempt,
                    stats.sent,
                    stats.coalesced
                );
            }
            _ = sleep_until_opt(deadline) => {
                info!("Run duration reached");
                break;
            }
            _ = &mut ctrl_c => {
                info!("Shutting down");
                break;
            }
        }
    }

    orch.disconnect();
    Ok(())
}
