//! Channel state shared by both transports and the orchestrator.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    /// Reconnect attempts exhausted; only an explicit connect leaves this state.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// UDP datagrams with heartbeat liveness
    Primary,
    /// WebSocket JSON with reconnect/backoff
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    pub state: ConnectionState,
    pub latency_ms: Option<f64>,
    pub reconnect_attempt: u32,
    pub mode: TransportMode,
}

impl ChannelStatus {
    pub fn idle(mode: TransportMode) -> Self {
        Self { state: ConnectionState::Idle, latency_ms: None, reconnect_attempt: 0, mode }
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid endpoint {0}")]
    Endpoint(String),
}

/// Where the backend lives. Both transports share the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub host: IpAddr,
    pub udp_port: u16,
    pub ws_port: u16,
}

impl ServerEndpoint {
    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.udp_port)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", SocketAddr::new(self.host, self.ws_port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url_brackets_ipv6() {
        let v4 = ServerEndpoint { host: "10.0.0.5".parse().unwrap(), udp_port: 9081, ws_port: 9080 };
        assert_eq!(v4.ws_url(), "ws://10.0.0.5:9080/ws");
        assert_eq!(v4.udp_addr().to_string(), "10.0.0.5:9081");

        let v6 = ServerEndpoint { host: "::1".parse().unwrap(), udp_port: 9081, ws_port: 9080 };
        assert_eq!(v6.ws_url(), "ws://[::1]:9080/ws");
    }
}
