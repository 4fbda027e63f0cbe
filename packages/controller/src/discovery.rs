//! # discovery
//!
//! Client side of LAN discovery. Listens on the beacon port, records the
//! sender of the last valid `WESQUASH|<port>|<version>` line and forgets it
//! once no beacon has arrived for the TTL (10s).

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info};
use wesquash_types::Announcement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredServer {
    pub ip: IpAddr,
    pub port: u16,
    pub version: u32,
}

pub struct DiscoveryListener {
    ttl: Duration,
    current: Option<(DiscoveredServer, Instant)>,
}

impl DiscoveryListener {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, current: None }
    }

    pub fn current(&self) -> Option<DiscoveredServer> {
        self.current.map(|(server, _)| server)
    }

    /// Feed one datagram. Malformed lines are ignored. Returns the server when
    /// it is new or its announcement changed.
    pub fn handle_datagram(&mut self, data: &[u8], from: SocketAddr, now: Instant) -> Option<DiscoveredServer> {
        let Some(announcement) = std::str::from_utf8(data).ok().and_then(Announcement::parse) else {
            debug!("Discovery: ignoring datagram from {from}");
            return None;
        };
        let server = DiscoveredServer {
            ip: from.ip(),
            port: announcement.port,
            version: announcement.version,
        };
        let changed = self.current() != Some(server);
        self.current = Some((server, now));
        if changed {
            info!("🔎 Discovered backend at {}:{} (v{})", server.ip, server.port, server.version);
            Some(server)
        } else {
            None
        }
    }

    /// Clear the server once its TTL lapses. Returns the server that was lost.
    pub fn tick(&mut self, now: Instant) -> Option<DiscoveredServer> {
        let (server, seen) = self.current?;
        if now.saturating_duration_since(seen) < self.ttl {
            return None;
        }
        info!("Discovery: backend {}:{} went quiet", server.ip, server.port);
        self.current = None;
        Some(server)
    }
}

/// Listen for beacons on `port` and publish the current server.
pub async fn run(port: u16, ttl: Duration, publish: watch::Sender<Option<DiscoveredServer>>) -> std::io::Result<()> {
    let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    info!("🔎 Listening for discovery beacons on UDP {port}");

    let mut listener = DiscoveryListener::new(ttl);
    let mut sweep = tokio::time::interval(Duration::from_millis(500));
    let mut buf = [0u8; 128];

    loop {
        tokio::select! {
            recv = socket.recv_from(&mut buf) => match recv {
                Ok((len, from)) => {
                    if listener.handle_datagram(&buf[..len], from, Instant::now()).is_some() {
                        publish.send_replace(listener.current());
                    }
                }
                Err(e) => debug!("Discovery: recv error: {e}"),
            },
            _ = sweep.tick() => {
                if listener.tick(Instant::now()).is_some() {
                    publish.send_replace(None);
                }
            }
        }
        if publish.is_closed() {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from(ip: &str) -> SocketAddr {
        SocketAddr::new(ip.parse().unwrap(), 40000)
    }

    #[test]
    fn test_beacon_recorded_then_expires() {
        let mut d = DiscoveryListener::new(Duration::from_secs(10));
        let t0 = Instant::now();

        let found = d.handle_datagram(b"WESQUASH|9081|1", from("10.0.0.5"), t0).unwrap();
        assert_eq!(found, DiscoveredServer { ip: "10.0.0.5".parse().unwrap(), port: 9081, version: 1 });
        assert_eq!(d.current(), Some(found));

        assert_eq!(d.tick(t0 + Duration::from_secs(9)), None);
        assert_eq!(d.current(), Some(found));
        assert_eq!(d.tick(t0 + Duration::from_secs(10)), Some(found));
        assert_eq!(d.current(), None);
    }

    #[test]
    fn test_refresh_extends_ttl() {
        let mut d = DiscoveryListener::new(Duration::from_secs(10));
        let t0 = Instant::now();
        d.handle_datagram(b"WESQUASH|9081|1", from("10.0.0.5"), t0);
        // Same announcement again: not reported as new, but refreshes.
        assert!(d.handle_datagram(b"WESQUASH|9081|1\n", from("10.0.0.5"), t0 + Duration::from_secs(8)).is_none());
        assert_eq!(d.tick(t0 + Duration::from_secs(12)), None);
        assert!(d.current().is_some());
    }

    #[test]
    fn test_malformed_lines_ignored() {
        let mut d = DiscoveryListener::new(Duration::from_secs(10));
        let now = Instant::now();
        for bad in [
            &b"SQUASH|9081|1"[..],
            b"WESQUASH|port|1",
            b"WESQUASH|9081",
            b"WESQUASH|9081|1|extra",
            &[0xff, 0xfe, 0x00],
        ] {
            assert!(d.handle_datagram(bad, from("10.0.0.5"), now).is_none());
        }
        assert_eq!(d.current(), None);
    }

    #[test]
    fn test_server_move_is_reported() {
        let mut d = DiscoveryListener::new(Duration::from_secs(10));
        let now = Instant::now();
        d.handle_datagram(b"WESQUASH|9081|1", from("10.0.0.5"), now);
        let moved = d.handle_datagram(b"WESQUASH|9081|1", from("10.0.0.9"), now).unwrap();
        assert_eq!(moved.ip, "10.0.0.9".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_listener_publishes_over_socket() {
        let port = {
            let probe = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };
        let (tx, mut rx) = watch::channel(None);
        tokio::spawn(run(port, Duration::from_secs(10), tx));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                // The listener may not be bound yet; keep announcing.
                sender.send_to(b"WESQUASH|9081|1", ("127.0.0.1", port)).await.unwrap();
                if let Ok(Ok(())) = tokio::time::timeout(Duration::from_millis(100), rx.changed()).await {
                    if let Some(s) = *rx.borrow() {
                        return s;
                    }
                }
            }
        })
        .await
        .expect("beacon discovered");
        assert_eq!(server.port, 9081);
        assert_eq!(server.ip, "127.0.0.1".parse::<IpAddr>().unwrap());
    }
}
