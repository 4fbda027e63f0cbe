//! Sensor sample model and the two conversions into the consumer frame.
//!
//! - **Euler source**: intrinsic Z-X'-Y'' angles `(alpha, beta, gamma)` in radians,
//!   composed as `Rz(alpha) · Rx(beta) · Ry(gamma)`.
//! - **Quaternion source**: Z-up right-handed quaternion, remapped to Y-up via
//!   `(x, y, z) → (x, z, -y)` with `w` unchanged.
//!
//! Neither conversion fails. NaN in, NaN out; ingestion paths reject
//! non-finite samples with [`RawSample::is_finite`] before converting.

use serde::{Deserialize, Serialize};

use crate::quat::{Quat, Vec3};

/// Where a sample's orientation came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrientationSource {
    /// Yaw (Z), pitch (X), roll (Y), radians
    Euler { alpha: f32, beta: f32, gamma: f32 },
    /// Raw device quaternion in the sensor's Z-up frame
    Quaternion { x: f32, y: f32, z: f32, w: f32 },
}

/// One sensor observation as produced by the handheld.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub source: OrientationSource,
    /// Angular rate, deg/s
    pub gyro: Vec3,
    /// Acceleration, m/s²
    pub accel: Vec3,
    /// Producer monotonic clock, milliseconds
    pub timestamp_ms: f64,
}

impl RawSample {
    pub fn from_euler(alpha: f32, beta: f32, gamma: f32, gyro: Vec3, accel: Vec3, timestamp_ms: f64) -> Self {
        Self {
            source: OrientationSource::Euler { alpha, beta, gamma },
            gyro,
            accel,
            timestamp_ms,
        }
    }

    pub fn is_finite(&self) -> bool {
        let source_ok = match self.source {
            OrientationSource::Euler { alpha, beta, gamma } => {
                alpha.is_finite() && beta.is_finite() && gamma.is_finite()
            }
            OrientationSource::Quaternion { x, y, z, w } => {
                x.is_finite() && y.is_finite() && z.is_finite() && w.is_finite()
            }
        };
        source_ok && self.gyro.is_finite() && self.accel.is_finite() && self.timestamp_ms.is_finite()
    }

    /// Orientation of this sample in the consumer frame.
    pub fn to_quat(&self) -> Quat {
        convert(&self.source)
    }
}

/// Dispatch on the source type.
pub fn convert(source: &OrientationSource) -> Quat {
    match *source {
        OrientationSource::Euler { alpha, beta, gamma } => euler_zxy_to_quat(alpha, beta, gamma),
        OrientationSource::Quaternion { x, y, z, w } => remap_z_up_to_y_up(x, y, z, w),
    }
}

/// `Rz(alpha) · Rx(beta) · Ry(gamma)` as a unit quaternion.
///
/// Never decomposes back to Euler, so beta = ±90° is not a singularity here.
pub fn euler_zxy_to_quat(alpha: f32, beta: f32, gamma: f32) -> Quat {
    (Quat::from_rotation_z(alpha) * Quat::from_rotation_x(beta) * Quat::from_rotation_y(gamma)).normalize()
}

/// Axis permutation plus one sign flip; the physical rotation is unchanged.
pub fn remap_z_up_to_y_up(x: f32, y: f32, z: f32, w: f32) -> Quat {
    Quat { x, y: z, z: -y, w }.normalize()
}
