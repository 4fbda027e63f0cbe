//! # orchestrator
//!
//! One transport-agnostic surface over the two channels: `connect`,
//! `disconnect`, `submit`, `status`. Exactly one mode is active at a time.
//!
//! Outbound samples are coalesced: the newest sample replaces any unsent one,
//! and sends are spaced at least `send_interval` (16 ms) apart. A sample that
//! arrives early waits for [`TransportOrchestrator::next_flush_at`] instead of
//! being dropped.
//!
//! A UDP channel that goes quiet is reconnected every `primary_retry`. With
//! `auto_fallback` the orchestrator instead fails over to the WebSocket, then
//! probes UDP on the same schedule and moves back once a probe gets a
//! heartbeat response.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};
use wesquash_types::messages::DEVICE_PHONE;
use wesquash_types::{Command, Packet, RawSample, SensorMessage, SensorPacket, WsMessage};

use crate::config::{ControllerConfig, UdpConfig, WebSocketConfig};
use crate::connection::{ChannelError, ChannelStatus, ConnectionState, ServerEndpoint, TransportMode};
use crate::udp_channel::UdpChannel;
use crate::ws_channel::WsChannel;

fn wall_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
        * 1000.0
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SendStats {
    pub sent: u64,
    /// Samples replaced by a newer one before they went out
    pub coalesced: u64,
    /// Samples the active transport cannot carry
    pub unsendable: u64,
}

pub struct TransportOrchestrator {
    udp_config: UdpConfig,
    ws_config: WebSocketConfig,
    send_interval: Duration,
    primary_retry: Duration,
    auto_fallback: bool,

    /// Mode the caller asked for
    preferred: TransportMode,
    /// Mode currently carrying traffic (differs from `preferred` while failed over)
    mode: TransportMode,
    endpoint: Option<ServerEndpoint>,
    connected: bool,

    udp: UdpChannel,
    /// Spawned on first use; needs a Tokio runtime.
    ws: Option<WsChannel>,
    probe: Option<UdpChannel>,
    /// Next primary reconnect or probe attempt
    next_probe: Option<Instant>,

    pending: Option<RawSample>,
    last_sent: Option<Instant>,
    stats: SendStats,
}

impl TransportOrchestrator {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            udp_config: config.udp.clone(),
            ws_config: config.websocket.clone(),
            send_interval: config.transport.send_interval(),
            primary_retry: config.transport.primary_retry(),
            auto_fallback: config.transport.auto_fallback,
            preferred: config.transport.mode,
            mode: config.transport.mode,
            endpoint: None,
            connected: false,
            udp: UdpChannel::new(&config.udp),
            ws: None,
            probe: None,
            next_probe: None,
            pending: None,
            last_sent: None,
            stats: SendStats::default(),
        }
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    pub fn endpoint(&self) -> Option<ServerEndpoint> {
        self.endpoint
    }

    pub fn stats(&self) -> SendStats {
        self.stats
    }

    pub fn status(&self) -> ChannelStatus {
        let mut status = match self.mode {
            TransportMode::Primary => self.udp.status(),
            TransportMode::Fallback => match &self.ws {
                Some(ws) => ws.status(),
                None => ChannelStatus::idle(TransportMode::Fallback),
            },
        };
        status.mode = self.mode;
        status
    }

    fn ws_channel(&mut self) -> &mut WsChannel {
        self.ws.get_or_insert_with(|| WsChannel::spawn(&self.ws_config))
    }

    pub fn connect(&mut self, endpoint: ServerEndpoint, now: Instant) -> Result<(), ChannelError> {
        self.teardown();
        self.endpoint = Some(endpoint);
        self.mode = self.preferred;
        self.connected = true;
        info!("Connecting to {} via {:?}", endpoint.host, self.mode);
        self.open_active(now)
    }

    fn open_active(&mut self, now: Instant) -> Result<(), ChannelError> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| ChannelError::Endpoint("no server selected".to_string()))?;
        match self.mode {
            TransportMode::Primary => self.udp.connect(endpoint.udp_addr(), now),
            TransportMode::Fallback => {
                self.ws_channel().connect(&endpoint.ws_url());
                Ok(())
            }
        }
    }

    fn teardown(&mut self) {
        self.udp.disconnect();
        if let Some(ws) = &self.ws {
            ws.disconnect();
        }
        self.probe = None;
        self.next_probe = None;
    }

    pub fn disconnect(&mut self) {
        self.connected = false;
        self.teardown();
        self.pending = None;
    }

    /// Switch transports. Tears the active channel down first.
    pub fn set_mode(&mut self, mode: TransportMode, now: Instant) -> Result<(), ChannelError> {
        self.preferred = mode;
        if mode == self.mode && self.probe.is_none() {
            return Ok(());
        }
        info!("Switching transport {:?} → {mode:?}", self.mode);
        self.teardown();
        self.mode = mode;
        if self.connected {
            self.open_active(now)?;
        }
        Ok(())
    }

    /// The host is back in the foreground (or the backend re-announced itself):
    /// revive a channel that dropped on its own, without waiting for the retry timer.
    pub fn on_foreground(&mut self, now: Instant) {
        match self.mode {
            TransportMode::Primary => {
                if self.connected && self.primary_lost() {
                    self.next_probe = Some(now);
                    self.recover_primary(now);
                }
            }
            TransportMode::Fallback => {
                if let Some(ws) = &self.ws {
                    ws.on_foreground();
                }
            }
        }
    }

    /// Queue `sample`, replacing any unsent one, and send it if the interval allows.
    pub fn submit(&mut self, sample: RawSample, now: Instant) {
        if self.pending.replace(sample).is_some() {
            self.stats.coalesced += 1;
        }
        self.flush(now);
    }

    /// When the deferred sample is due, if one is waiting on an open channel.
    pub fn next_flush_at(&self) -> Option<Instant> {
        if self.pending.is_none() || !self.status().is_open() {
            return None;
        }
        self.last_sent.map(|t| t + self.send_interval)
    }

    fn flush(&mut self, now: Instant) {
        let Some(sample) = self.pending else { return };
        if let Some(last) = self.last_sent {
            if now < last + self.send_interval {
                return;
            }
        }
        if !self.status().is_open() {
            // Keep the newest sample for when the channel opens.
            return;
        }
        self.last_sent = Some(now);
        match self.send_sample(&sample) {
            Some(true) => {
                self.pending = None;
                self.stats.sent += 1;
            }
            Some(false) => {}
            None => {
                self.pending = None;
                self.stats.unsendable += 1;
            }
        }
    }

    /// `None` when the active transport cannot encode the sample at all.
    fn send_sample(&mut self, sample: &RawSample) -> Option<bool> {
        match self.mode {
            TransportMode::Primary => match SensorPacket::try_from(sample) {
                Ok(packet) => Some(self.udp.send(&Packet::Sensor(packet).encode())),
                Err(e) => {
                    debug!("Sample not sendable over UDP: {e}");
                    None
                }
            },
            TransportMode::Fallback => {
                let msg = WsMessage::Sensor(SensorMessage::from_sample(sample));
                Some(self.ws.as_ref().is_some_and(|ws| ws.send(&msg)))
            }
        }
    }

    /// Ask the backend to capture the rest pose. Sent immediately, never coalesced.
    pub fn request_calibration(&mut self) -> bool {
        let ts = wall_ms();
        let sent = match self.mode {
            TransportMode::Primary => {
                let packet = Packet::Command { command: Command::Calibrate, timestamp_ms: ts };
                self.udp.send(&packet.encode())
            }
            TransportMode::Fallback => {
                let msg = WsMessage::Calibrate { device: DEVICE_PHONE.to_string(), ts: ts as i64 };
                self.ws.as_ref().is_some_and(|ws| ws.send(&msg))
            }
        };
        if sent {
            info!("🎯 Calibration requested");
        }
        sent
    }

    /// Drive timers and sockets: heartbeats, failover, probes, deferred flush.
    pub fn tick(&mut self, now: Instant) {
        self.udp.tick(now);
        if let Some(ws) = &mut self.ws {
            for msg in ws.poll() {
                match msg {
                    WsMessage::Welcome { message } => info!("Server says: {message}"),
                    other => debug!("Unhandled server message: {other:?}"),
                }
            }
        }

        if self.connected {
            match self.mode {
                TransportMode::Primary if self.primary_lost() => {
                    if self.auto_fallback {
                        self.fail_over(now);
                    } else {
                        self.recover_primary(now);
                    }
                }
                TransportMode::Fallback if self.auto_fallback && self.preferred == TransportMode::Primary => {
                    self.probe_primary(now)
                }
                _ => {}
            }
        }

        self.flush(now);
    }

    /// UDP timed out rather than being closed by the caller.
    fn primary_lost(&self) -> bool {
        self.udp.state() == ConnectionState::Closed && !self.udp.closed_manually()
    }

    /// Rebind the primary channel once `next_probe` is due.
    fn recover_primary(&mut self, now: Instant) {
        let due = *self.next_probe.get_or_insert(now + self.primary_retry);
        if now < due {
            return;
        }
        let Some(endpoint) = self.endpoint else { return };
        info!("Reconnecting primary transport to {}", endpoint.udp_addr());
        self.next_probe = None;
        if let Err(e) = self.udp.connect(endpoint.udp_addr(), now) {
            warn!("Primary reconnect failed: {e}");
            self.next_probe = Some(now + self.primary_retry);
        }
    }

    fn fail_over(&mut self, now: Instant) {
        warn!("Primary transport lost, failing over to WebSocket");
        self.mode = TransportMode::Fallback;
        self.next_probe = Some(now + self.primary_retry);
        if let Err(e) = self.open_active(now) {
            warn!("Fallback connect failed: {e}");
        }
    }

    fn probe_primary(&mut self, now: Instant) {
        let Some(endpoint) = self.endpoint else { return };

        let Some(mut probe) = self.probe.take() else {
            if self.next_probe.is_some_and(|t| now >= t) {
                let mut probe = UdpChannel::new(&self.udp_config);
                match probe.connect(endpoint.udp_addr(), now) {
                    Ok(()) => {
                        debug!("Probing primary transport");
                        self.probe = Some(probe);
                    }
                    Err(e) => {
                        debug!("Primary probe bind failed: {e}");
                        self.next_probe = Some(now + self.primary_retry);
                    }
                }
            }
            return;
        };

        probe.tick(now);
        match probe.state() {
            ConnectionState::Open => {
                info!("Primary transport is back, leaving fallback");
                if let Some(ws) = &self.ws {
                    ws.disconnect();
                }
                self.udp = probe;
                self.mode = TransportMode::Primary;
                self.next_probe = None;
            }
            ConnectionState::Closed | ConnectionState::Error => {
                self.next_probe = Some(now + self.primary_retry);
            }
            _ => self.probe = Some(probe),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use wesquash_types::Vec3;

    fn config() -> ControllerConfig {
        let mut cfg = ControllerConfig::default();
        cfg.websocket.backoff_base_ms = 10;
        cfg.websocket.backoff_max_ms = 20;
        cfg.websocket.max_attempts = 1;
        cfg
    }

    fn fake_hub() -> UdpSocket {
        let hub = UdpSocket::bind("127.0.0.1:0").unwrap();
        hub.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        hub
    }

    fn endpoint(hub: &UdpSocket) -> ServerEndpoint {
        ServerEndpoint {
            host: "127.0.0.1".parse().unwrap(),
            udp_port: hub.local_addr().unwrap().port(),
            // Nothing listens here; the WebSocket side just retries.
            ws_port: 1,
        }
    }

    /// Echo every queued heartbeat; return any other packets.
    fn service(hub: &UdpSocket) -> Vec<Packet> {
        hub.set_nonblocking(true).unwrap();
        let mut other = Vec::new();
        let mut buf = [0u8; 64];
        while let Ok((len, src)) = hub.recv_from(&mut buf) {
            match Packet::decode(&buf[..len]).unwrap() {
                Packet::Heartbeat { timestamp_ms } => {
                    hub.send_to(&Packet::HeartbeatResponse { timestamp_ms }.encode(), src).unwrap();
                }
                p => other.push(p),
            }
        }
        hub.set_nonblocking(false).unwrap();
        other
    }

    fn open_primary(orch: &mut TransportOrchestrator, hub: &UdpSocket) {
        orch.connect(endpoint(hub), Instant::now()).unwrap();
        for _ in 0..200 {
            orch.tick(Instant::now());
            service(hub);
            if orch.status().is_open() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("primary never opened");
    }

    fn sample(ts: f64) -> RawSample {
        RawSample::from_euler(0.1, 0.2, 0.3, Vec3::ZERO, Vec3::new(0.0, 0.0, 9.81), ts)
    }

    fn sensor_timestamps(hub: &UdpSocket) -> Vec<f64> {
        std::thread::sleep(Duration::from_millis(20));
        service(hub)
            .into_iter()
            .filter_map(|p| match p {
                Packet::Sensor(s) => Some(s.timestamp_ms),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_latest_sample_wins_with_deferred_flush() {
        let hub = fake_hub();
        let mut orch = TransportOrchestrator::new(&config());
        open_primary(&mut orch, &hub);

        let t = Instant::now();
        orch.submit(sample(1.0), t);
        orch.submit(sample(2.0), t + Duration::from_millis(5));
        orch.submit(sample(3.0), t + Duration::from_millis(10));
        assert_eq!(orch.next_flush_at(), Some(t + Duration::from_millis(16)));

        orch.tick(t + Duration::from_millis(12));
        orch.tick(t + Duration::from_millis(16));
        assert_eq!(orch.next_flush_at(), None);

        assert_eq!(sensor_timestamps(&hub), vec![1.0, 3.0]);
        assert_eq!(orch.stats(), SendStats { sent: 2, coalesced: 1, unsendable: 0 });
    }

    #[test]
    fn test_sample_waits_for_open_channel() {
        let hub = fake_hub();
        let mut orch = TransportOrchestrator::new(&config());
        let now = Instant::now();
        orch.connect(endpoint(&hub), now).unwrap();
        orch.submit(sample(1.0), now);
        assert_eq!(orch.status().state, ConnectionState::Connecting);
        assert_eq!(orch.next_flush_at(), None);

        // Opening the channel releases the held sample.
        for _ in 0..200 {
            orch.tick(Instant::now());
            service(&hub);
            if orch.stats().sent == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(sensor_timestamps(&hub), vec![1.0]);
    }

    #[test]
    fn test_quaternion_sample_not_sent_over_udp() {
        let hub = fake_hub();
        let mut orch = TransportOrchestrator::new(&config());
        open_primary(&mut orch, &hub);
        let mut q = sample(5.0);
        q.source = wesquash_types::OrientationSource::Quaternion { x: 0.0, y: 0.0, z: 0.0, w: 1.0 };
        orch.submit(q, Instant::now());
        assert_eq!(orch.stats().unsendable, 1);
        assert_eq!(orch.next_flush_at(), None);
    }

    #[test]
    fn test_calibration_command_sent_on_primary() {
        let hub = fake_hub();
        let mut orch = TransportOrchestrator::new(&config());
        open_primary(&mut orch, &hub);
        assert!(orch.request_calibration());

        std::thread::sleep(Duration::from_millis(20));
        let packets = service(&hub);
        assert!(packets
            .iter()
            .any(|p| matches!(p, Packet::Command { command: Command::Calibrate, .. })));
    }

    #[tokio::test]
    async fn test_mode_switch_tears_down_active_channel() {
        let hub = fake_hub();
        let mut orch = TransportOrchestrator::new(&config());
        let now = Instant::now();
        orch.connect(endpoint(&hub), now).unwrap();
        assert_eq!(orch.status().mode, TransportMode::Primary);

        orch.set_mode(TransportMode::Fallback, now).unwrap();
        assert_eq!(orch.udp.state(), ConnectionState::Closed);
        assert_eq!(orch.status().mode, TransportMode::Fallback);
        assert!(orch.ws.is_some());

        orch.disconnect();
        orch.disconnect();
        assert!(!orch.status().is_open());
    }

    #[tokio::test]
    async fn test_auto_fallback_and_return_to_primary() {
        let hub = fake_hub();
        let mut cfg = config();
        cfg.transport.auto_fallback = true;
        let mut orch = TransportOrchestrator::new(&cfg);

        // Hub stays silent: primary times out and the orchestrator fails over.
        let t0 = Instant::now();
        orch.connect(endpoint(&hub), t0).unwrap();
        orch.tick(t0);
        orch.tick(t0 + Duration::from_secs(15));
        assert_eq!(orch.mode(), TransportMode::Fallback);

        // After primary_retry a probe starts; once the hub answers we move back.
        let t1 = t0 + Duration::from_secs(25);
        orch.tick(t1);
        assert!(orch.probe.is_some());
        for i in 1..=200 {
            orch.tick(t1 + Duration::from_millis(i));
            service(&hub);
            if orch.mode() == TransportMode::Primary {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(orch.mode(), TransportMode::Primary);
        assert!(orch.status().is_open());
    }

    #[test]
    fn test_primary_reconnects_after_timeout() {
        let hub = fake_hub();
        let mut orch = TransportOrchestrator::new(&config());
        assert!(!config().transport.auto_fallback);

        // Hub silent for the whole inactivity window.
        let t0 = Instant::now();
        orch.connect(endpoint(&hub), t0).unwrap();
        orch.tick(t0);
        orch.tick(t0 + Duration::from_secs(15));
        assert_eq!(orch.status().state, ConnectionState::Closed);
        service(&hub);

        orch.tick(t0 + Duration::from_secs(24));
        assert_eq!(orch.status().state, ConnectionState::Closed);

        // Hub answers from here on; samples keep arriving.
        let mut t = t0 + Duration::from_secs(25);
        let mut ts = 0.0;
        while t < t0 + Duration::from_secs(85) {
            ts += 1.0;
            orch.submit(sample(ts), t);
            orch.tick(t);
            service(&hub);
            if orch.stats().sent > 0 {
                break;
            }
            if orch.status().state == ConnectionState::Connecting {
                std::thread::sleep(Duration::from_millis(2));
            }
            t += Duration::from_millis(10);
        }
        assert_eq!(orch.mode(), TransportMode::Primary);
        assert_eq!(orch.status().state, ConnectionState::Open);
        assert!(orch.stats().sent >= 1);
    }

    #[test]
    fn test_foreground_reconnects_lost_primary_now() {
        let hub = fake_hub();
        let mut orch = TransportOrchestrator::new(&config());
        let t0 = Instant::now();
        orch.connect(endpoint(&hub), t0).unwrap();
        orch.tick(t0);
        orch.tick(t0 + Duration::from_secs(15));
        assert_eq!(orch.status().state, ConnectionState::Closed);

        orch.on_foreground(t0 + Duration::from_secs(16));
        assert_eq!(orch.status().state, ConnectionState::Connecting);

        // A manual disconnect stays down.
        orch.disconnect();
        orch.on_foreground(t0 + Duration::from_secs(17));
        orch.tick(t0 + Duration::from_secs(60));
        assert_eq!(orch.status().state, ConnectionState::Closed);
    }
}
