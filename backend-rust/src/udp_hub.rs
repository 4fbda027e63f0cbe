//! # udp_hub
//!
//! Primary transport server. Receives fixed-layout datagrams from controllers,
//! answers heartbeats, and feeds decoded samples into the orientation pipeline.
//!
//! ## Architecture
//! Runs as its own Tokio task alongside the WebSocket fallback server. It:
//!   1. Binds UDP on port 9081 (configurable via WESQUASH_UDP_PORT)
//!   2. Waits for a datagram, then drains everything queued on the socket
//!   3. Admits peers through the session registry (capacity-limited)
//!   4. Echoes heartbeats as heartbeat-responses for client RTT measurement
//!   5. Sweeps idle peers every second and reports them as gone
//!
//! Malformed datagrams, unknown packet types and rejected peers are logged
//! and dropped. Nothing here ends the loop except the socket itself failing to bind.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use wesquash_types::{Command, Packet};

use crate::config::HubConfig;
use crate::sessions::{Admission, PeerSessionRegistry};
use crate::state::{forward, InputEvent, PeerRef};

/// Largest datagram we care about; anything bigger is malformed anyway.
const RECV_BUFFER: usize = 512;

/// Stateful datagram handler, separate from the socket so it can be driven directly.
pub struct HubCore {
    registry: PeerSessionRegistry,
    events: mpsc::Sender<InputEvent>,
}

impl HubCore {
    pub fn new(config: &HubConfig, events: mpsc::Sender<InputEvent>) -> Self {
        Self {
            registry: PeerSessionRegistry::new(config.max_connections, config.peer_timeout),
            events,
        }
    }

    #[cfg(test)]
    pub fn registry(&self) -> &PeerSessionRegistry {
        &self.registry
    }

    /// Handle one datagram. Returns the reply to send to `src`, if any.
    pub async fn handle_datagram(&mut self, data: &[u8], src: SocketAddr, now: Instant) -> Option<Bytes> {
        let packet = match Packet::decode(data) {
            Ok(p) => p,
            Err(e) => {
                debug!("UDP hub: discarding datagram from {src}: {e}");
                return None;
            }
        };

        let peer_id = match self.registry.get_or_create(src, now) {
            Admission::Existing(id) => id,
            Admission::Created(id) => {
                forward(&self.events, InputEvent::PeerJoined { peer: PeerRef::udp(id), addr: src }).await;
                id
            }
            Admission::Rejected => return None,
        };
        self.registry.touch(peer_id, now);
        let peer = PeerRef::udp(peer_id);

        match packet {
            Packet::Heartbeat { timestamp_ms } => {
                return Some(Packet::HeartbeatResponse { timestamp_ms }.encode());
            }
            Packet::Sensor(sensor) => {
                forward(&self.events, InputEvent::Sample { peer, sample: sensor.to_sample() }).await;
            }
            Packet::Command { command: Command::Calibrate, .. } => {
                info!("UDP hub: calibration command from {peer}");
                forward(&self.events, InputEvent::Calibrate { peer }).await;
            }
            Packet::HeartbeatResponse { .. } => {
                debug!("UDP hub: unexpected heartbeat-response from {peer}");
            }
        }
        None
    }

    pub async fn sweep(&mut self, now: Instant) {
        for session in self.registry.sweep(now) {
            forward(&self.events, InputEvent::PeerLeft { peer: PeerRef::udp(session.peer_id) }).await;
        }
    }
}

pub struct UdpHub {
    socket: UdpSocket,
    core: HubCore,
    sweep_interval: std::time::Duration,
}

impl UdpHub {
    pub async fn bind(config: &HubConfig, events: mpsc::Sender<InputEvent>) -> std::io::Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.udp_port));
        let socket = UdpSocket::bind(addr).await?;
        info!("📡 UDP hub listening on {}", socket.local_addr()?);
        Ok(Self {
            socket,
            core: HubCore::new(config, events),
            sweep_interval: config.sweep_interval,
        })
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn run(mut self) {
        let mut buf = vec![0u8; RECV_BUFFER];
        let mut sweep = tokio::time::interval(self.sweep_interval);

        loop {
            tokio::select! {
                readable = self.socket.readable() => {
                    if let Err(e) = readable {
                        warn!("UDP hub: socket error: {e}");
                        continue;
                    }
                    self.drain(&mut buf).await;
                }
                _ = sweep.tick() => {
                    self.core.sweep(Instant::now()).await;
                }
            }
        }
    }

    /// Process every datagram currently queued, then return to waiting.
    async fn drain(&mut self, buf: &mut [u8]) {
        loop {
            match self.socket.try_recv_from(buf) {
                Ok((len, src)) => {
                    let reply = self.core.handle_datagram(&buf[..len], src, Instant::now()).await;
                    if let Some(reply) = reply {
                        if let Err(e) = self.socket.send_to(&reply, src).await {
                            // Never fatal: the client will retry its heartbeat.
                            warn!("UDP hub: reply to {src} failed: {e}");
                        }
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    // ICMP port-unreachable from a vanished peer surfaces here on some platforms.
                    debug!("UDP hub: recv error: {e}");
                    break;
                }
            }
        }
    }
}
