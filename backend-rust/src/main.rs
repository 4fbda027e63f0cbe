mod beacon;
mod calibration;
mod config;
mod pipeline;
mod sessions;
mod smoothing;
mod state;
mod swing;
mod udp_hub;
mod ws_server;

use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use beacon::Beacon;
use config::BackendConfig;
use pipeline::OrientationPipeline;
use state::{InputEvent, OrientationFrame};
use udp_hub::UdpHub;
use ws_server::WsServer;

/// Transport → pipeline queue depth. At 60 Hz from a handful of peers this never fills.
const EVENT_QUEUE: usize = 1024;
const STATUS_EVERY: Duration = Duration::from_secs(5);

// ─── Pipeline Tick Task ───────────────────────────────────────────────────────

async fn run_pipeline_tick(
    mut pipeline: OrientationPipeline,
    mut events: mpsc::Receiver<InputEvent>,
    frames: watch::Sender<OrientationFrame>,
    tick: Duration,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_tick = Instant::now();
    let mut last_status = Instant::now();

    loop {
        interval.tick().await;
        let now = Instant::now();

        // Drain everything the transports delivered since the last frame.
        while let Ok(event) = events.try_recv() {
            pipeline.handle_event(event, now);
        }

        let dt = now.duration_since(last_tick).as_secs_f32();
        last_tick = now;
        let frame = pipeline.tick(dt, now);
        frames.send_replace(frame);

        if now.duration_since(last_status) >= STATUS_EVERY {
            last_status = now;
            let stats = pipeline.stats();
            let active = pipeline
                .active_peer()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "none".to_string());
            info!(
                "📊 active={active} calibrating={} accepted={} stale={} invalid={} foreign={}",
                pipeline.is_calibrating(),
                stats.accepted,
                stats.stale,
                stats.invalid,
                stats.foreign
            );
        }
    }
}

/// Stand-in renderer: reports swings as they happen.
async fn run_frame_consumer(mut frames: watch::Receiver<OrientationFrame>) {
    while frames.changed().await.is_ok() {
        let frame = *frames.borrow_and_update();
        if let Some(swing) = frame.swing {
            let q = frame.orientation;
            info!(
                "🏸 Swing power={:.2} at q=({:.3}, {:.3}, {:.3}, {:.3})",
                swing.power, q.x, q.y, q.z, q.w
            );
        }
    }
}

// ─── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wesquash_backend=info".into()),
        )
        .init();

    info!("🎾 WeSquash backend starting...");

    let config = BackendConfig::from_env();
    config.validate().context("invalid configuration")?;

    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
    let (frame_tx, frame_rx) = watch::channel(OrientationFrame::default());

    let hub = UdpHub::bind(&config.hub, event_tx.clone())
        .await
        .with_context(|| format!("binding UDP hub on port {}", config.hub.udp_port))?;
    let ws = WsServer::bind(&config.ws, event_tx)
        .await
        .with_context(|| format!("binding WS server on port {}", config.ws.ws_port))?;

    tokio::spawn(hub.run());
    tokio::spawn(ws.run());

    if config.beacon.enabled {
        match Beacon::bind(&config.beacon).await {
            Ok(beacon) => {
                tokio::spawn(beacon.run());
            }
            // Discovery is a convenience; controllers can still connect by address.
            Err(e) => warn!("Discovery beacon disabled: {e}"),
        }
    }

    let pipeline = OrientationPipeline::new(&config.pipeline);
    tokio::spawn(run_pipeline_tick(pipeline, event_rx, frame_tx, config.tick_interval()));
    tokio::spawn(run_frame_consumer(frame_rx));

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("Shutting down");
    Ok(())
}
