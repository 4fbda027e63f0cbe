use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use wesquash_types::{DISCOVERY_PORT, UDP_PORT, WS_PORT};

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("{field} = {value} is outside {min}..={max}")]
    OutOfRange { field: &'static str, value: f64, min: f64, max: f64 },
    #[error("swing saturation ({saturation}) must exceed threshold ({threshold})")]
    SwingRange { threshold: f32, saturation: f32 },
}

/// Above this the tick period rounds down to nothing.
pub const MAX_TICK_HZ: f64 = 1000.0;
pub const MAX_CALIBRATION_SECS: f64 = 60.0;

fn check_range(field: &'static str, value: f64, max: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value <= max {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, value, min: 0.0, max })
    }
}

/// Read `key` from the environment, falling back to `default` when unset or unparsable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ── Transport ─────────────────────────────────────────────────────────────────

pub struct HubConfig {
    /// UDP port for the primary transport (default 9081)
    pub udp_port: u16,
    /// Concurrent UDP peers admitted (default 4)
    pub max_connections: usize,
    /// Peer evicted after this long without a valid packet (default 15s)
    pub peer_timeout: Duration,
    /// How often the registry is swept for idle peers
    pub sweep_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            udp_port: env_or("WESQUASH_UDP_PORT", UDP_PORT),
            max_connections: env_or("WESQUASH_MAX_CONNECTIONS", 4),
            peer_timeout: Duration::from_millis(env_or("WESQUASH_PEER_TIMEOUT_MS", 15_000)),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

pub struct WsConfig {
    /// WebSocket fallback port (default 9080)
    pub ws_port: u16,
    /// Server-initiated ping period, for RTT logging
    pub ping_interval: Duration,
    pub max_connections: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            ws_port: env_or("WESQUASH_WS_PORT", WS_PORT),
            ping_interval: Duration::from_secs(5),
            max_connections: env_or("WESQUASH_MAX_CONNECTIONS", 4),
        }
    }
}

pub struct BeaconConfig {
    pub enabled: bool,
    pub discovery_port: u16,
    pub broadcast_addr: Ipv4Addr,
    /// Port announced in the beacon (the primary UDP port)
    pub announced_port: u16,
    pub interval: Duration,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            enabled: env_or("WESQUASH_BEACON", true),
            discovery_port: env_or("WESQUASH_DISCOVERY_PORT", DISCOVERY_PORT),
            broadcast_addr: env_or("WESQUASH_BROADCAST_ADDR", Ipv4Addr::BROADCAST),
            announced_port: env_or("WESQUASH_UDP_PORT", UDP_PORT),
            interval: Duration::from_secs(2),
        }
    }
}

// ── Orientation pipeline ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SwingConfig {
    /// Gyro magnitude (deg/s) that counts as a swing
    pub threshold_dps: f32,
    /// Gyro magnitude (deg/s) mapped to power 1.0
    pub saturation_dps: f32,
    pub cooldown: Duration,
}

impl Default for SwingConfig {
    fn default() -> Self {
        Self {
            threshold_dps: env_or("WESQUASH_SWING_THRESHOLD_DPS", 400.0),
            saturation_dps: env_or("WESQUASH_SWING_SATURATION_DPS", 1500.0),
            cooldown: Duration::from_millis(env_or("WESQUASH_SWING_COOLDOWN_MS", 350)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Rest-pose capture window in seconds (default 3.0)
    pub calibration_secs: f64,
    /// Exponential smoothing rate, 1/s
    pub smoothing_speed: f32,
    pub swing: SwingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            calibration_secs: env_or("WESQUASH_CALIBRATION_SECS", 3.0),
            smoothing_speed: env_or("WESQUASH_SMOOTHING_SPEED", 12.0),
            swing: SwingConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Only meaningful once [`BackendConfig::validate`] has accepted `calibration_secs`.
    pub fn calibration_duration(&self) -> Duration {
        Duration::from_secs_f64(self.calibration_secs)
    }
}

// ── Top level ─────────────────────────────────────────────────────────────────

pub struct BackendConfig {
    pub hub: HubConfig,
    pub ws: WsConfig,
    pub beacon: BeaconConfig,
    pub pipeline: PipelineConfig,
    /// Render/consumer tick rate (default 60 Hz)
    pub tick_hz: f64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            hub: HubConfig::default(),
            ws: WsConfig::default(),
            beacon: BeaconConfig::default(),
            pipeline: PipelineConfig::default(),
            tick_hz: env_or("WESQUASH_TICK_HZ", 60.0),
        }
    }
}

impl BackendConfig {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hub.max_connections == 0 || self.ws.max_connections == 0 {
            return Err(ConfigError::Zero("max_connections"));
        }
        if self.hub.peer_timeout.is_zero() {
            return Err(ConfigError::Zero("peer_timeout"));
        }
        check_range("tick_hz", self.tick_hz, MAX_TICK_HZ)?;
        check_range("calibration_secs", self.pipeline.calibration_secs, MAX_CALIBRATION_SECS)?;
        if !(self.pipeline.smoothing_speed > 0.0 && self.pipeline.smoothing_speed.is_finite()) {
            return Err(ConfigError::Zero("smoothing_speed"));
        }
        let swing = &self.pipeline.swing;
        if swing.saturation_dps <= swing.threshold_dps {
            return Err(ConfigError::SwingRange {
                threshold: swing.threshold_dps,
                saturation: swing.saturation_dps,
            });
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        std::env::set_var("WESQUASH_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_or("WESQUASH_TEST_GARBAGE", 7_u16), 7);
        std::env::set_var("WESQUASH_TEST_PORT", "9999");
        assert_eq!(env_or("WESQUASH_TEST_PORT", 1_u16), 9999);
        assert_eq!(env_or("WESQUASH_TEST_UNSET_KEY", 3_usize), 3);
    }

    #[test]
    fn test_defaults_validate() {
        let cfg = BackendConfig::from_env();
        assert_eq!(cfg.validate(), Ok(()));
        assert!(cfg.tick_interval() > Duration::ZERO);
    }

    #[test]
    fn test_rejects_inverted_swing_range() {
        let mut cfg = BackendConfig::from_env();
        cfg.pipeline.swing.threshold_dps = 900.0;
        cfg.pipeline.swing.saturation_dps = 500.0;
        assert!(matches!(cfg.validate(), Err(ConfigError::SwingRange { .. })));
    }

    #[test]
    fn test_rejects_unusable_rates_and_windows() {
        for hz in [0.0, -1.0, f64::NAN, f64::INFINITY, 1e9] {
            let mut cfg = BackendConfig::from_env();
            cfg.tick_hz = hz;
            assert!(
                matches!(cfg.validate(), Err(ConfigError::OutOfRange { field: "tick_hz", .. })),
                "tick_hz {hz} accepted"
            );
        }
        for secs in [0.0, -3.0, f64::NAN, f64::INFINITY, 1e30] {
            let mut cfg = BackendConfig::from_env();
            cfg.pipeline.calibration_secs = secs;
            assert!(
                matches!(cfg.validate(), Err(ConfigError::OutOfRange { field: "calibration_secs", .. })),
                "calibration_secs {secs} accepted"
            );
        }

        let mut cfg = BackendConfig::from_env();
        cfg.tick_hz = MAX_TICK_HZ;
        cfg.pipeline.calibration_secs = 0.5;
        assert_eq!(cfg.validate(), Ok(()));
        assert_eq!(cfg.tick_interval(), Duration::from_millis(1));
        assert_eq!(cfg.pipeline.calibration_duration(), Duration::from_millis(500));
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let mut cfg = BackendConfig::from_env();
        cfg.hub.max_connections = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::Zero("max_connections")));
    }
}
