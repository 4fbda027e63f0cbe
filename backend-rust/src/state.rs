use std::fmt;
use std::net::SocketAddr;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;
use wesquash_types::{Quat, RawSample};

// ─── Peers ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Udp,
    WebSocket,
}

/// A connected controller, qualified by the transport it arrived on
/// (each transport allocates ids independently).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PeerRef {
    pub transport: Transport,
    pub peer_id: u32,
}

impl PeerRef {
    pub fn udp(peer_id: u32) -> Self {
        Self { transport: Transport::Udp, peer_id }
    }

    pub fn ws(peer_id: u32) -> Self {
        Self { transport: Transport::WebSocket, peer_id }
    }
}

impl fmt::Display for PeerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.transport {
            Transport::Udp => write!(f, "udp#{}", self.peer_id),
            Transport::WebSocket => write!(f, "ws#{}", self.peer_id),
        }
    }
}

// ─── Transport → pipeline ────────────────────────────────────────────────────

/// Everything the transports hand to the orientation pipeline.
#[derive(Debug, Clone)]
pub enum InputEvent {
    PeerJoined { peer: PeerRef, addr: SocketAddr },
    PeerLeft { peer: PeerRef },
    Sample { peer: PeerRef, sample: RawSample },
    Calibrate { peer: PeerRef },
}

impl InputEvent {
    /// Joins and departures decide the active peer and must not be lost.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::PeerJoined { .. } | Self::PeerLeft { .. })
    }
}

/// Hand an event to the pipeline. Lifecycle events wait for queue room;
/// samples and commands are dropped when the queue is full.
pub async fn forward(events: &mpsc::Sender<InputEvent>, event: InputEvent) {
    if event.is_lifecycle() {
        if let Err(e) = events.send(event).await {
            debug!("Pipeline gone, lifecycle event dropped: {:?}", e.0);
        }
    } else if let Err(e) = events.try_send(event) {
        debug!("Pipeline queue unavailable, event dropped: {e}");
    }
}

// ─── Pipeline → consumer ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SwingEvent {
    /// 0.0 at the detection threshold, 1.0 at saturation
    pub power: f32,
}

/// What the renderer receives every tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrientationFrame {
    pub orientation: Quat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swing: Option<SwingEvent>,
    pub calibrating: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_peer: Option<PeerRef>,
}

impl Default for OrientationFrame {
    fn default() -> Self {
        Self {
            orientation: Quat::IDENTITY,
            swing: None,
            calibrating: false,
            active_peer: None,
        }
    }
}
