//! # pipeline
//!
//! Orientation pipeline owned by the consumer tick loop.
//!
//! ```text
//! RawSample → convert → (calibrating? collect : baseline⁻¹·q) → target
//! tick(dt)  → slerp(displayed, target, 1-e^(-k·dt)) → OrientationFrame
//! ```
//!
//! One controller drives the pipeline at a time: the first peer to send a sample
//! becomes active and keeps the pipeline until it leaves.

use std::time::Instant;

use tracing::{debug, info, warn};
use wesquash_types::{Quat, RawSample};

use crate::calibration::{CalibrationEngine, Ingest};
use crate::config::PipelineConfig;
use crate::smoothing::SmoothingFilter;
use crate::state::{InputEvent, OrientationFrame, PeerRef, SwingEvent};
use crate::swing::SwingDetector;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub accepted: u64,
    pub stale: u64,
    pub invalid: u64,
    pub foreign: u64,
}

pub struct OrientationPipeline {
    calibration: CalibrationEngine,
    smoothing: SmoothingFilter,
    swing: SwingDetector,
    target: Quat,
    last_sample_ts: Option<f64>,
    active_peer: Option<PeerRef>,
    pending_swing: Option<SwingEvent>,
    stats: PipelineStats,
}

impl OrientationPipeline {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            calibration: CalibrationEngine::new(config.calibration_duration()),
            smoothing: SmoothingFilter::new(config.smoothing_speed),
            swing: SwingDetector::new(config.swing.clone()),
            target: Quat::IDENTITY,
            last_sample_ts: None,
            active_peer: None,
            pending_swing: None,
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn active_peer(&self) -> Option<PeerRef> {
        self.active_peer
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibration.is_calibrating()
    }

    #[cfg(test)]
    pub fn baseline(&self) -> Quat {
        self.calibration.baseline()
    }

    pub fn handle_event(&mut self, event: InputEvent, now: Instant) {
        match event {
            InputEvent::PeerJoined { peer, addr } => {
                debug!("Pipeline: {peer} joined from {addr}");
            }
            InputEvent::PeerLeft { peer } => {
                if self.active_peer == Some(peer) {
                    info!("Active controller {peer} left; pipeline released");
                    self.active_peer = None;
                    self.last_sample_ts = None;
                }
            }
            InputEvent::Sample { peer, sample } => {
                self.ingest(peer, &sample, now);
            }
            InputEvent::Calibrate { peer } => {
                if self.claim(peer) {
                    info!("Calibration requested by {peer}");
                    self.calibration.request(now);
                }
            }
        }
    }

    /// Bind the pipeline to `peer` if free. False when another controller holds it.
    fn claim(&mut self, peer: PeerRef) -> bool {
        match self.active_peer {
            Some(active) if active != peer => {
                self.stats.foreign += 1;
                debug!("Ignoring {peer}: pipeline held by {active}");
                false
            }
            Some(_) => true,
            None => {
                info!("Controller {peer} is now active");
                self.active_peer = Some(peer);
                self.last_sample_ts = None;
                true
            }
        }
    }

    /// Returns true if the sample moved the target (or was collected for calibration).
    pub fn ingest(&mut self, peer: PeerRef, sample: &RawSample, now: Instant) -> bool {
        if !self.claim(peer) {
            return false;
        }
        if !sample.is_finite() {
            self.stats.invalid += 1;
            warn!("Dropping non-finite sample from {peer}");
            return false;
        }
        if let Some(last) = self.last_sample_ts {
            if sample.timestamp_ms <= last {
                self.stats.stale += 1;
                debug!("Dropping stale sample from {peer}: ts {} <= {last}", sample.timestamp_ms);
                return false;
            }
        }
        self.last_sample_ts = Some(sample.timestamp_ms);
        self.stats.accepted += 1;

        match self.calibration.ingest(sample.to_quat(), now) {
            Ingest::Collected => {}
            Ingest::Relative(rel) => {
                self.target = rel;
                if let Some(ev) = self.swing.update(sample.gyro, now) {
                    self.pending_swing = Some(ev);
                }
            }
        }
        true
    }

    pub fn tick(&mut self, dt: f32, now: Instant) -> OrientationFrame {
        if self.calibration.tick(now).is_some() {
            // The old target was relative to the previous baseline.
            self.target = Quat::IDENTITY;
            self.smoothing.reset(Quat::IDENTITY);
        }

        let orientation = self.smoothing.update(self.target, dt);
        OrientationFrame {
            orientation,
            swing: self.pending_swing.take(),
            calibrating: self.calibration.is_calibrating(),
            active_peer: self.active_peer,
        }
    }
}
