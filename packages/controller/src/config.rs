//! Controller configuration, loaded from `config.toml`.
//!
//! Every section has defaults, so a partial file (or none) is valid. CLI flags
//! are applied on top in `main`.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use wesquash_types::{DISCOVERY_PORT, UDP_PORT, WS_PORT};

use crate::backoff::Backoff;
use crate::connection::TransportMode;

/// Bundled defaults, used when no config file is found.
pub const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("{field} = {value} is outside {min}..={max}")]
    OutOfRange { field: &'static str, value: f64, min: f64, max: f64 },
}

/// Above this the sample period rounds toward zero, which `tokio::time::interval` rejects.
pub const MAX_RATE_HZ: f64 = 1000.0;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub server: ServerConfig,
    pub transport: TransportConfig,
    pub udp: UdpConfig,
    pub websocket: WebSocketConfig,
    pub discovery: DiscoveryConfig,
    pub sensor: SensorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Backend host; `None` waits for a discovery beacon
    pub host: Option<IpAddr>,
    pub udp_port: u16,
    pub ws_port: u16,
    pub discovery_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: None, udp_port: UDP_PORT, ws_port: WS_PORT, discovery_port: DISCOVERY_PORT }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub mode: TransportMode,
    pub auto_fallback: bool,
    pub send_interval_ms: u64,
    pub primary_retry_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Primary,
            auto_fallback: false,
            send_interval_ms: 16,
            primary_retry_ms: 10_000,
        }
    }
}

impl TransportConfig {
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn primary_retry(&self) -> Duration {
        Duration::from_millis(self.primary_retry_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    /// When off the channel is open as soon as the socket binds
    pub heartbeat: bool,
    pub heartbeat_interval_ms: u64,
    pub inactivity_timeout_ms: u64,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self { heartbeat: true, heartbeat_interval_ms: 5_000, inactivity_timeout_ms: 15_000 }
    }
}

impl UdpConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    pub connect_timeout_ms: u64,
    pub ping_interval_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub max_attempts: u32,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            ping_interval_ms: 5_000,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            max_attempts: 10,
        }
    }
}

impl WebSocketConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_max_ms),
            self.max_attempts,
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub ttl_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self { ttl_ms: 10_000 }
    }
}

impl DiscoveryConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub rate_hz: f64,
    /// Seconds between synthetic swings
    pub swing_period_s: f64,
    /// Gaussian orientation noise, degrees (1σ)
    pub noise_deg: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self { rate_hz: 60.0, swing_period_s: 4.0, noise_deg: 0.5 }
    }
}

impl ControllerConfig {
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Read `path`, or the bundled defaults if it does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::from_toml(DEFAULT_CONFIG),
            Err(e) => Err(e.into()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport.send_interval_ms == 0 {
            return Err(ConfigError::Zero("transport.send_interval_ms"));
        }
        if self.transport.primary_retry_ms == 0 {
            return Err(ConfigError::Zero("transport.primary_retry_ms"));
        }
        if self.udp.heartbeat_interval_ms == 0 || self.udp.inactivity_timeout_ms == 0 {
            return Err(ConfigError::Zero("udp heartbeat timers"));
        }
        if self.websocket.ping_interval_ms == 0 || self.websocket.connect_timeout_ms == 0 {
            return Err(ConfigError::Zero("websocket timers"));
        }
        if self.discovery.ttl_ms == 0 {
            return Err(ConfigError::Zero("discovery.ttl_ms"));
        }
        let rate = self.sensor.rate_hz;
        if !(rate > 0.0 && rate <= MAX_RATE_HZ) {
            return Err(ConfigError::OutOfRange { field: "sensor.rate_hz", value: rate, min: 0.0, max: MAX_RATE_HZ });
        }
        Ok(())
    }

    /// Sensor sampling period. Only meaningful after [`Self::validate`].
    pub fn sample_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.sensor.rate_hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_config_matches_defaults() {
        let cfg = ControllerConfig::from_toml(DEFAULT_CONFIG).unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.server.host, None);
        assert_eq!(cfg.server.udp_port, 9081);
        assert_eq!(cfg.server.ws_port, 9080);
        assert_eq!(cfg.server.discovery_port, 9079);
        assert_eq!(cfg.transport.mode, TransportMode::Primary);
        assert_eq!(cfg.transport.send_interval(), Duration::from_millis(16));
        assert_eq!(cfg.udp.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(cfg.udp.inactivity_timeout(), Duration::from_secs(15));
        assert_eq!(cfg.websocket.connect_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.websocket.max_attempts, 10);
        assert_eq!(cfg.discovery.ttl(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let cfg = ControllerConfig::from_toml(
            r#"
[server]
host = "192.168.1.20"

[transport]
mode = "fallback"
auto_fallback = true
"#,
        )
        .unwrap();
        assert_eq!(cfg.server.host, Some("192.168.1.20".parse().unwrap()));
        assert_eq!(cfg.server.udp_port, 9081);
        assert_eq!(cfg.transport.mode, TransportMode::Fallback);
        assert!(cfg.transport.auto_fallback);
        assert_eq!(cfg.websocket.backoff_max_ms, 30_000);
        assert_eq!(cfg.sensor.rate_hz, 60.0);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            ControllerConfig::from_toml("[transport]\nmode = \"carrier-pigeon\"\n"),
            Err(ConfigError::Parse(_))
        ));

        let mut cfg = ControllerConfig::default();
        cfg.transport.send_interval_ms = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Zero(_))));
    }

    #[test]
    fn test_rejects_unusable_sample_rates() {
        for rate in [0.0, -5.0, f64::NAN, f64::INFINITY, 1e12] {
            let mut cfg = ControllerConfig::default();
            cfg.sensor.rate_hz = rate;
            assert!(
                matches!(cfg.validate(), Err(ConfigError::OutOfRange { field: "sensor.rate_hz", .. })),
                "rate {rate} accepted"
            );
        }
        let mut cfg = ControllerConfig::default();
        cfg.sensor.rate_hz = MAX_RATE_HZ;
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.sample_period(), Duration::from_millis(1));
    }

    #[test]
    fn test_missing_file_falls_back_to_bundled() {
        let cfg = ControllerConfig::load("/nonexistent/wesquash/config.toml").unwrap();
        assert_eq!(cfg.server.udp_port, 9081);
    }
}
