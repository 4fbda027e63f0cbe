use std::time::Duration;

use rand::Rng;

/// Exponential reconnect backoff with ±25% jitter.
///
/// `delay(n) = min(base · 2^n, max) · (0.75 + 0.5·r)`, `r ∈ [0, 1)`. Jitter keeps a
/// room full of controllers from reconnecting in lockstep after an AP blip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self { base, max, max_attempts }
    }

    /// Un-jittered delay before reconnect attempt `attempt` (0-based).
    pub fn nominal(&self, attempt: u32) -> Duration {
        // 2^31 · base overflows long before it matters; saturate instead.
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let jitter = 0.75 + 0.5 * rng.gen::<f64>();
        self.nominal(attempt).mul_f64(jitter)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 10)
    }

    #[test]
    fn test_nominal_is_monotone_and_bounded() {
        let b = backoff();
        let mut prev = Duration::ZERO;
        for attempt in 0..64 {
            let d = b.nominal(attempt);
            assert!(d >= prev, "attempt {attempt}: {d:?} < {prev:?}");
            assert!(d <= b.max);
            prev = d;
        }
        assert_eq!(b.nominal(0), Duration::from_secs(1));
        assert_eq!(b.nominal(3), Duration::from_secs(8));
        assert_eq!(b.nominal(5), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let b = backoff();
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 0..12 {
            let n = b.nominal(attempt);
            for _ in 0..50 {
                let d = b.delay(attempt, &mut rng);
                assert!(d >= n.mul_f64(0.75) && d <= n.mul_f64(1.25), "{d:?} vs {n:?}");
            }
        }
    }

    #[test]
    fn test_exhausted_after_max_attempts() {
        let b = backoff();
        assert!(!b.exhausted(9));
        assert!(b.exhausted(10));
    }
}
