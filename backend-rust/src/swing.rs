use std::time::Instant;

use tracing::debug;
use wesquash_types::Vec3;

use crate::config::SwingConfig;
use crate::state::SwingEvent;

/// Fires once per swing when the gyro magnitude crosses the threshold.
///
/// Re-arms only after the magnitude drops back under the threshold and the
/// cooldown has passed, so one long swing never reports twice.
pub struct SwingDetector {
    config: SwingConfig,
    armed: bool,
    last_fired: Option<Instant>,
}

impl SwingDetector {
    pub fn new(config: SwingConfig) -> Self {
        Self { config, armed: true, last_fired: None }
    }

    pub fn update(&mut self, gyro: Vec3, now: Instant) -> Option<SwingEvent> {
        let magnitude = gyro.length();
        if magnitude < self.config.threshold_dps {
            self.armed = true;
            return None;
        }
        if !self.armed {
            return None;
        }
        if let Some(t) = self.last_fired {
            if now.saturating_duration_since(t) < self.config.cooldown {
                return None;
            }
        }

        self.armed = false;
        self.last_fired = Some(now);
        let span = self.config.saturation_dps - self.config.threshold_dps;
        let power = ((magnitude - self.config.threshold_dps) / span).clamp(0.0, 1.0);
        debug!(magnitude, power, "Swing detected");
        Some(SwingEvent { power })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn detector() -> SwingDetector {
        SwingDetector::new(SwingConfig {
            threshold_dps: 400.0,
            saturation_dps: 1400.0,
            cooldown: Duration::from_millis(300),
        })
    }

    #[test]
    fn test_fires_once_per_swing() {
        let mut d = detector();
        let t0 = Instant::now();
        assert!(d.update(Vec3::new(100.0, 0.0, 0.0), t0).is_none());

        let ev = d.update(Vec3::new(0.0, 900.0, 0.0), t0 + Duration::from_millis(10)).unwrap();
        assert!((ev.power - 0.5).abs() < 1e-4);

        // Still above threshold: same swing.
        assert!(d.update(Vec3::new(0.0, 1200.0, 0.0), t0 + Duration::from_millis(20)).is_none());
    }

    #[test]
    fn test_cooldown_and_rearm() {
        let mut d = detector();
        let t0 = Instant::now();
        assert!(d.update(Vec3::new(500.0, 0.0, 0.0), t0).is_some());
        d.update(Vec3::ZERO, t0 + Duration::from_millis(50));
        // Re-armed but inside cooldown.
        assert!(d.update(Vec3::new(500.0, 0.0, 0.0), t0 + Duration::from_millis(100)).is_none());
        d.update(Vec3::ZERO, t0 + Duration::from_millis(350));
        assert!(d.update(Vec3::new(500.0, 0.0, 0.0), t0 + Duration::from_millis(400)).is_some());
    }

    #[test]
    fn test_power_saturates() {
        let mut d = detector();
        let ev = d.update(Vec3::new(5000.0, 0.0, 0.0), Instant::now()).unwrap();
        assert_eq!(ev.power, 1.0);
    }
}
