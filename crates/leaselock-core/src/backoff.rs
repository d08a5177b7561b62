//! Retry delays used while waiting for a lock held by someone else.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with up to 25% additive jitter, capped at `max`.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial.min(max),
            max,
        }
    }

    /// Delay before the next attempt, never more than `max`.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let base = self.current;
        let jitter_ms = (base.as_millis() as u64) / 4;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        self.current = (self.current * 2).min(self.max);
        (base + jitter).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(8));
        let delays: Vec<_> = (0..6).map(|_| backoff.next_delay()).collect();
        // 1ms has no jitter room
        assert_eq!(delays[0], Duration::from_millis(1));
        assert!(delays[3] >= Duration::from_millis(8));
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(8)));
    }

    proptest! {
        #[test]
        fn prop_delay_never_exceeds_cap(initial in 1u64..2_000, max in 1u64..5_000, steps in 1usize..20) {
            let mut backoff = Backoff::new(Duration::from_millis(initial), Duration::from_millis(max));
            let mut floor = Duration::ZERO;
            for _ in 0..steps {
                let delay = backoff.next_delay();
                prop_assert!(delay <= Duration::from_millis(max));
                prop_assert!(delay >= floor.min(Duration::from_millis(max)));
                floor = Duration::from_millis(initial.min(max));
            }
        }
    }
}
