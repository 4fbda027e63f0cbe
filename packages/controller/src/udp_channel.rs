//! # udp_channel
//!
//! Primary transport: fixed-layout datagrams to the backend's UDP hub.
//!
//! Sending a datagram proves nothing, so the channel only reports `Open` after
//! the first heartbeat-response comes back:
//!
//! ```text
//! connect ─► Connecting ──first heartbeat-response──► Open
//!                │                                     │
//!                └──────── no response for 15s ────────┴─► Closed
//! ```
//!
//! The channel never reconnects on its own; the orchestrator decides what to do
//! with a closed channel. Driven by [`UdpChannel::tick`] from the caller's loop
//! over a non-blocking socket (poll, then drain).

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use wesquash_types::Packet;

use crate::config::UdpConfig;
use crate::connection::{ChannelError, ChannelStatus, ConnectionState, TransportMode};

const RECV_BUFFER: usize = 64;

pub struct UdpChannel {
    heartbeat: bool,
    heartbeat_interval: Duration,
    inactivity_timeout: Duration,
    /// Heartbeat timestamps are milliseconds since this instant.
    clock: Instant,

    socket: Option<UdpSocket>,
    remote: Option<SocketAddr>,
    state: ConnectionState,
    latency_ms: Option<f64>,
    /// Start of the current inactivity window (connect time or last response).
    last_response: Instant,
    next_heartbeat: Instant,
    manual: bool,
}

impl UdpChannel {
    pub fn new(config: &UdpConfig) -> Self {
        let now = Instant::now();
        Self {
            heartbeat: config.heartbeat,
            heartbeat_interval: config.heartbeat_interval(),
            inactivity_timeout: config.inactivity_timeout(),
            clock: now,
            socket: None,
            remote: None,
            state: ConnectionState::Idle,
            latency_ms: None,
            last_response: now,
            next_heartbeat: now,
            manual: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn status(&self) -> ChannelStatus {
        ChannelStatus {
            state: self.state,
            latency_ms: self.latency_ms,
            reconnect_attempt: 0,
            mode: TransportMode::Primary,
        }
    }

    /// True when the last close was requested by the caller rather than a timeout.
    pub fn closed_manually(&self) -> bool {
        self.manual
    }

    fn millis_at(&self, at: Instant) -> f64 {
        at.saturating_duration_since(self.clock).as_secs_f64() * 1000.0
    }

    /// Bind an ephemeral socket aimed at `remote`. Reachability is unknown until
    /// the first heartbeat-response.
    pub fn connect(&mut self, remote: SocketAddr, now: Instant) -> Result<(), ChannelError> {
        self.close_socket();

        let bind: SocketAddr = if remote.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind)?;
        socket.set_nonblocking(true)?;
        info!("📡 UDP channel bound {} → {remote}", socket.local_addr()?);

        self.socket = Some(socket);
        self.remote = Some(remote);
        self.manual = false;
        self.latency_ms = None;
        self.last_response = now;
        self.next_heartbeat = now;
        self.state = if self.heartbeat { ConnectionState::Connecting } else { ConnectionState::Open };
        Ok(())
    }

    /// Fire-and-forget. False unless the channel is open and the OS took the datagram.
    pub fn send(&self, bytes: &[u8]) -> bool {
        if self.state != ConnectionState::Open {
            return false;
        }
        let (Some(socket), Some(remote)) = (&self.socket, self.remote) else {
            return false;
        };
        match socket.send_to(bytes, remote) {
            Ok(_) => true,
            Err(e) => {
                debug!("UDP channel: send failed: {e}");
                false
            }
        }
    }

    /// Idempotent. Cancels heartbeats and the inactivity timer.
    pub fn disconnect(&mut self) {
        if self.socket.is_some() {
            info!("UDP channel disconnected");
        }
        self.manual = true;
        self.close_socket();
        self.state = ConnectionState::Closed;
    }

    fn close_socket(&mut self) {
        self.socket = None;
        self.remote = None;
    }

    /// Poll responses, enforce the inactivity window, send a due heartbeat.
    pub fn tick(&mut self, now: Instant) {
        if !matches!(self.state, ConnectionState::Connecting | ConnectionState::Open) {
            return;
        }
        self.drain(now);

        if self.heartbeat && now.saturating_duration_since(self.last_response) >= self.inactivity_timeout {
            warn!(
                "UDP channel: no heartbeat response for {:.0}s, closing",
                self.inactivity_timeout.as_secs_f32()
            );
            self.close_socket();
            self.state = ConnectionState::Closed;
            return;
        }

        if self.heartbeat && now >= self.next_heartbeat {
            self.send_heartbeat(now);
            self.next_heartbeat = now + self.heartbeat_interval;
        }
    }

    fn send_heartbeat(&self, now: Instant) {
        let (Some(socket), Some(remote)) = (&self.socket, self.remote) else {
            return;
        };
        let packet = Packet::Heartbeat { timestamp_ms: self.millis_at(now) }.encode();
        if let Err(e) = socket.send_to(&packet, remote) {
            // Next interval retries; the inactivity timer decides liveness.
            debug!("UDP channel: heartbeat send failed: {e}");
        }
    }

    fn drain(&mut self, now: Instant) {
        let mut buf = [0u8; RECV_BUFFER];
        loop {
            let Some(socket) = &self.socket else { return };
            let (len, src) = match socket.recv_from(&mut buf) {
                Ok(r) => r,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    // ICMP port-unreachable lands here when the hub is down.
                    debug!("UDP channel: recv error: {e}");
                    return;
                }
            };
            if Some(src) != self.remote {
                debug!("UDP channel: ignoring datagram from {src}");
                continue;
            }
            match Packet::decode(&buf[..len]) {
                Ok(Packet::HeartbeatResponse { timestamp_ms }) => {
                    let latency = (self.millis_at(now) - timestamp_ms).max(0.0);
                    self.latency_ms = Some(latency);
                    self.last_response = now;
                    if self.state == ConnectionState::Connecting {
                        info!("✅ UDP channel open ({latency:.1} ms)");
                        self.state = ConnectionState::Open;
                    }
                }
                Ok(other) => debug!("UDP channel: unexpected packet type {:#04x}", other.kind()),
                Err(e) => debug!("UDP channel: bad datagram: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> UdpConfig {
        UdpConfig { heartbeat: true, heartbeat_interval_ms: 5_000, inactivity_timeout_ms: 15_000 }
    }

    fn fake_hub() -> UdpSocket {
        let hub = UdpSocket::bind("127.0.0.1:0").unwrap();
        hub.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        hub
    }

    /// Answer one heartbeat the way the backend does.
    fn echo_heartbeat(hub: &UdpSocket) -> f64 {
        let mut buf = [0u8; 64];
        let (len, src) = hub.recv_from(&mut buf).unwrap();
        let Packet::Heartbeat { timestamp_ms } = Packet::decode(&buf[..len]).unwrap() else {
            panic!("expected heartbeat");
        };
        hub.send_to(&Packet::HeartbeatResponse { timestamp_ms }.encode(), src).unwrap();
        timestamp_ms
    }

    fn tick_until_open(ch: &mut UdpChannel) {
        for _ in 0..200 {
            ch.tick(Instant::now());
            if ch.state() == ConnectionState::Open {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("channel never opened: {:?}", ch.status());
    }

    #[test]
    fn test_open_only_after_heartbeat_response() {
        let hub = fake_hub();
        let mut ch = UdpChannel::new(&config());
        ch.connect(hub.local_addr().unwrap(), Instant::now()).unwrap();
        assert_eq!(ch.state(), ConnectionState::Connecting);
        assert!(!ch.send(b"early"));

        ch.tick(Instant::now());
        echo_heartbeat(&hub);
        tick_until_open(&mut ch);

        let latency = ch.status().latency_ms.expect("latency measured");
        assert!(latency >= 0.0);
        assert!(ch.send(&[0x02; 9]));
    }

    #[test]
    fn test_inactivity_closes_without_reconnect() {
        let hub = fake_hub();
        let mut ch = UdpChannel::new(&config());
        let t0 = Instant::now();
        ch.connect(hub.local_addr().unwrap(), t0).unwrap();
        ch.tick(t0);
        ch.tick(t0 + Duration::from_secs(14));
        assert_eq!(ch.state(), ConnectionState::Connecting);

        ch.tick(t0 + Duration::from_secs(15));
        assert_eq!(ch.state(), ConnectionState::Closed);
        assert!(!ch.closed_manually());

        ch.tick(t0 + Duration::from_secs(60));
        assert_eq!(ch.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let hub = fake_hub();
        let mut ch = UdpChannel::new(&config());
        ch.connect(hub.local_addr().unwrap(), Instant::now()).unwrap();
        ch.disconnect();
        ch.disconnect();
        assert_eq!(ch.state(), ConnectionState::Closed);
        assert!(ch.closed_manually());
        assert!(!ch.send(b"late"));
    }

    #[test]
    fn test_heartbeat_disabled_opens_immediately() {
        let hub = fake_hub();
        let mut ch = UdpChannel::new(&UdpConfig { heartbeat: false, ..config() });
        ch.connect(hub.local_addr().unwrap(), Instant::now()).unwrap();
        assert_eq!(ch.state(), ConnectionState::Open);
        ch.tick(Instant::now() + Duration::from_secs(60));
        assert_eq!(ch.state(), ConnectionState::Open);
    }
}
