//! # beacon
//!
//! LAN discovery: broadcasts `WESQUASH|<port>|<version>` to the discovery port
//! every 2s so controllers can find the UDP hub without typing an address.

use std::net::{SocketAddr, SocketAddrV4};

use tokio::net::UdpSocket;
use tracing::{debug, info, warn};
use wesquash_types::Announcement;

use crate::config::BeaconConfig;

pub struct Beacon {
    socket: UdpSocket,
    target: SocketAddr,
    line: String,
    interval: std::time::Duration,
}

impl Beacon {
    pub async fn bind(config: &BeaconConfig) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.set_broadcast(true)?;
        let target = SocketAddr::V4(SocketAddrV4::new(config.broadcast_addr, config.discovery_port));
        let line = Announcement::new(config.announced_port).to_line();
        info!("📣 Discovery beacon '{line}' → {target} every {:?}", config.interval);
        Ok(Self { socket, target, line, interval: config.interval })
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        let mut failures = 0u32;
        loop {
            ticker.tick().await;
            match self.socket.send_to(self.line.as_bytes(), self.target).await {
                Ok(_) => {
                    if failures > 0 {
                        info!("Discovery beacon recovered after {failures} failed sends");
                        failures = 0;
                    }
                    debug!("Beacon sent");
                }
                Err(e) => {
                    // Networks without broadcast keep failing; warn once, then stay quiet.
                    if failures == 0 {
                        warn!("Discovery beacon send failed: {e}");
                    }
                    failures += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    #[tokio::test]
    async fn test_beacon_announces_hub_port() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let beacon = Beacon::bind(&BeaconConfig {
            enabled: true,
            discovery_port: port,
            broadcast_addr: Ipv4Addr::LOCALHOST,
            announced_port: 9081,
            interval: Duration::from_millis(50),
        })
        .await
        .unwrap();
        tokio::spawn(beacon.run());

        let mut buf = [0u8; 64];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), listener.recv_from(&mut buf))
            .await
            .expect("beacon in time")
            .unwrap();
        let line = std::str::from_utf8(&buf[..len]).unwrap();
        assert_eq!(Announcement::parse(line), Some(Announcement { port: 9081, version: 1 }));
    }
}
