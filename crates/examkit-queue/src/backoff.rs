//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use examkit_core::config::QueueSettings;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    /// Up to this fraction of the delay is added at random.
    pub jitter_ratio: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from(&QueueSettings::default())
    }
}

impl From<&QueueSettings> for Backoff {
    fn from(s: &QueueSettings) -> Self {
        Self {
            base: Duration::from_millis(s.base_backoff_ms),
            max: Duration::from_millis(s.max_backoff_ms),
            jitter_ratio: s.jitter_ratio.clamp(0.0, 1.0),
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        self.base.saturating_mul(1 << exp).min(self.max)
    }

    /// Delay before retry number `attempt`, with jitter drawn from `rng`.
    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter_ratio <= 0.0 {
            return base;
        }
        let jitter = base.mul_f64(self.jitter_ratio * rng.gen::<f64>());
        (base + jitter).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn backoff(jitter_ratio: f64) -> Backoff {
        Backoff {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
            jitter_ratio,
        }
    }

    #[test]
    fn doubles_until_capped() {
        let b = backoff(0.0);
        assert_eq!(b.base_delay(1), Duration::from_millis(500));
        assert_eq!(b.base_delay(2), Duration::from_millis(1000));
        assert_eq!(b.base_delay(3), Duration::from_millis(2000));
        assert_eq!(b.base_delay(10), Duration::from_secs(30));
        assert_eq!(b.base_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_ratio() {
        let b = backoff(0.25);
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 1..=4 {
            let base = b.base_delay(attempt);
            for _ in 0..50 {
                let d = b.delay(attempt, &mut rng);
                assert!(d >= base);
                assert!(d <= base.mul_f64(1.25));
            }
        }
    }
}
