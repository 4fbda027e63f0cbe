//! sensor_sim.rs — Synthetic handheld motion
//!
//! Stands in for a phone's orientation and motion sensors so the whole pipeline
//! can run without hardware:
//! - Idle sway: slow sinusoidal yaw/pitch/roll around a resting pose
//! - Swings: every `swing_period_s`, a 250 ms forehand sweep of ~100° yaw with
//!   a gyro spike well past the backend's swing threshold
//! - Gaussian noise on every angle, like a real fused sensor
//!
//! Angles are radians (device Euler alpha/beta/gamma); gyro is deg/s; accel m/s².

use std::f32::consts::{PI, TAU};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use wesquash_types::{RawSample, Vec3};

use crate::config::SensorConfig;

const SWING_DURATION_S: f64 = 0.25;
const SWING_ARC_RAD: f32 = 1.75;
const GRAVITY: f32 = 9.81;

pub struct SensorSim {
    t: f64,
    swing_period: f64,
    /// Noise 1σ, radians
    sigma: f32,
    rng: StdRng,
    last_euler: [f32; 3],
}

impl SensorSim {
    pub fn new(cfg: &SensorConfig) -> Self {
        Self::with_rng(cfg, StdRng::from_entropy())
    }

    /// Deterministic stream for tests and replays.
    pub fn seeded(cfg: &SensorConfig, seed: u64) -> Self {
        Self::with_rng(cfg, StdRng::seed_from_u64(seed))
    }

    fn with_rng(cfg: &SensorConfig, rng: StdRng) -> Self {
        let sigma = (cfg.noise_deg.max(0.0) as f32).to_radians();
        Self {
            t: 0.0,
            swing_period: cfg.swing_period_s.max(SWING_DURATION_S * 2.0),
            sigma: if sigma.is_finite() { sigma } else { 0.0 },
            rng,
            last_euler: [0.0; 3],
        }
    }

    /// Yaw offset of the swing in progress (0 outside a swing).
    fn swing_yaw(&self) -> f32 {
        let phase = self.t % self.swing_period;
        let start = self.swing_period - SWING_DURATION_S;
        if phase < start {
            return 0.0;
        }
        // Smooth out-and-back sweep over the swing window.
        let u = ((phase - start) / SWING_DURATION_S) as f32;
        SWING_ARC_RAD * (PI * u).sin()
    }

    fn noise(&mut self) -> f32 {
        let n: f32 = self.rng.sample(StandardNormal);
        n * self.sigma
    }

    /// Advance by `dt` seconds and produce the next sample.
    pub fn next(&mut self, dt: f64) -> RawSample {
        self.t += dt.max(0.0);
        let t = self.t as f32;

        let alpha = 0.15 * (TAU * 0.2 * t).sin() + self.swing_yaw() + self.noise();
        let beta = 0.08 * (TAU * 0.13 * t).sin() + self.noise();
        let gamma = 0.05 * (TAU * 0.31 * t + 1.0).sin() + self.noise();
        let euler = [alpha, beta, gamma];

        // Finite-difference angular rate, deg/s.
        let gyro = if dt > 0.0 {
            let rate = |i: usize| (euler[i] - self.last_euler[i]).to_degrees() / dt as f32;
            Vec3::new(rate(0), rate(1), rate(2))
        } else {
            Vec3::ZERO
        };
        self.last_euler = euler;

        let accel = Vec3::new(GRAVITY * gamma.sin(), GRAVITY * beta.sin(), GRAVITY * beta.cos() * gamma.cos());
        RawSample::from_euler(alpha, beta, gamma, gyro, accel, self.t * 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SensorConfig {
        SensorConfig { rate_hz: 60.0, swing_period_s: 2.0, noise_deg: 0.2 }
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let mut sim = SensorSim::seeded(&cfg(), 1);
        let mut last = -1.0;
        for _ in 0..300 {
            let s = sim.next(1.0 / 60.0);
            assert!(s.is_finite());
            assert!(s.timestamp_ms > last);
            last = s.timestamp_ms;
        }
    }

    #[test]
    fn test_swing_produces_gyro_spike() {
        let mut sim = SensorSim::seeded(&cfg(), 2);
        let peak = (0..240)
            .map(|_| sim.next(1.0 / 120.0).gyro.length())
            .fold(0.0_f32, f32::max);
        // 1.75 rad out and back in 250 ms peaks near 1250 deg/s.
        assert!(peak > 600.0, "peak {peak}");
    }

    #[test]
    fn test_idle_is_calm() {
        let mut sim = SensorSim::seeded(&SensorConfig { swing_period_s: 100.0, ..cfg() }, 3);
        sim.next(1.0 / 60.0);
        for _ in 0..120 {
            assert!(sim.next(1.0 / 60.0).gyro.length() < 400.0);
        }
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let mut a = SensorSim::seeded(&cfg(), 42);
        let mut b = SensorSim::seeded(&cfg(), 42);
        for _ in 0..10 {
            assert_eq!(a.next(0.01), b.next(0.01));
        }
    }
}
