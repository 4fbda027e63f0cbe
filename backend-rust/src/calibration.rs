//! # calibration
//!
//! Rest-pose capture. `Idle → Calibrating → Idle`:
//!
//! - `request()` clears collected samples and opens a window (default 3s).
//! - While the window is open every converted sample is collected and nothing is
//!   forwarded downstream.
//! - When the window elapses the baseline is the hemisphere-corrected running
//!   slerp average of the samples (identity if none arrived).
//!
//! Once calibrated, each sample `q` becomes `baseline⁻¹ · q`.

use std::time::{Duration, Instant};

use tracing::info;
use wesquash_types::Quat;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationPhase {
    Idle,
    Calibrating { started_at: Instant },
}

/// What happened to a sample fed to [`CalibrationEngine::ingest`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ingest {
    /// Held for the baseline; not for display
    Collected,
    /// Displacement from the rest pose
    Relative(Quat),
}

pub struct CalibrationEngine {
    duration: Duration,
    phase: CalibrationPhase,
    samples: Vec<Quat>,
    baseline: Quat,
}

impl CalibrationEngine {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            phase: CalibrationPhase::Idle,
            samples: Vec::new(),
            baseline: Quat::IDENTITY,
        }
    }

    pub fn request(&mut self, now: Instant) {
        self.samples.clear();
        self.phase = CalibrationPhase::Calibrating { started_at: now };
        info!("Calibration started ({:.1}s window)", self.duration.as_secs_f32());
    }

    pub fn is_calibrating(&self) -> bool {
        matches!(self.phase, CalibrationPhase::Calibrating { .. })
    }

    #[cfg(test)]
    pub fn baseline(&self) -> Quat {
        self.baseline
    }

    /// Finalize if the window has elapsed. Returns the new baseline when it does.
    pub fn tick(&mut self, now: Instant) -> Option<Quat> {
        let CalibrationPhase::Calibrating { started_at } = self.phase else {
            return None;
        };
        if now.saturating_duration_since(started_at) < self.duration {
            return None;
        }

        self.baseline = average_rotations(&self.samples);
        info!(
            samples = self.samples.len(),
            x = self.baseline.x,
            y = self.baseline.y,
            z = self.baseline.z,
            w = self.baseline.w,
            "Calibration complete"
        );
        self.samples.clear();
        self.phase = CalibrationPhase::Idle;
        Some(self.baseline)
    }

    pub fn ingest(&mut self, q: Quat, now: Instant) -> Ingest {
        self.tick(now);
        if self.is_calibrating() {
            self.samples.push(q);
            Ingest::Collected
        } else {
            Ingest::Relative(self.baseline.relative_to(q))
        }
    }
}

/// Running slerp mean with hemisphere correction.
///
/// `avg` starts at the first sample; sample `i` is flipped onto `avg`'s hemisphere
/// when `dot < 0`, then `avg = slerp(avg, q_i, 1/(i+1))`.
pub fn average_rotations(samples: &[Quat]) -> Quat {
    let Some((&first, rest)) = samples.split_first() else {
        return Quat::IDENTITY;
    };

    let mut avg = first.normalize();
    for (offset, &q) in rest.iter().enumerate() {
        let i = offset + 1;
        let q = if avg.dot(q) < 0.0 { -q } else { q };
        avg = avg.slerp(q, 1.0 / (i as f32 + 1.0));
    }
    avg.normalize()
}
