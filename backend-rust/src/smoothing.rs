use wesquash_types::Quat;

/// `1 - e^(-speed·dt)`: the fraction of the remaining arc covered in `dt` seconds.
///
/// Compounding this over any tick schedule gives the same curve in wall-clock time.
pub fn blend_factor(speed: f32, dt: f32) -> f32 {
    if !(dt > 0.0) || !dt.is_finite() {
        return 0.0;
    }
    (1.0 - (-speed * dt).exp()).clamp(0.0, 1.0)
}

/// Frame-rate independent exponential slerp toward the latest target.
pub struct SmoothingFilter {
    speed: f32,
    displayed: Quat,
}

impl SmoothingFilter {
    pub fn new(speed: f32) -> Self {
        Self { speed, displayed: Quat::IDENTITY }
    }

    #[cfg(test)]
    pub fn displayed(&self) -> Quat {
        self.displayed
    }

    /// Snap to `q` without interpolating (after calibration the old display is meaningless).
    pub fn reset(&mut self, q: Quat) {
        self.displayed = q.normalize();
    }

    pub fn update(&mut self, target: Quat, dt: f32) -> Quat {
        let b = blend_factor(self.speed, dt);
        if b > 0.0 {
            self.displayed = self.displayed.slerp(target, b);
        }
        self.displayed
    }
}
