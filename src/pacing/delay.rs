//! Randomized pause between consecutive sends.

use std::time::Duration;

use rand::Rng;

/// Uniform delay in whole seconds between `min` and `max`, both inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterSendDelay {
    min_secs: u64,
    max_secs: u64,
}

impl InterSendDelay {
    /// Bounds are truncated to whole seconds and swapped if inverted.
    pub fn new(min: Duration, max: Duration) -> Self {
        let (a, b) = (min.as_secs(), max.as_secs());
        Self {
            min_secs: a.min(b),
            max_secs: a.max(b),
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        Duration::from_secs(rng.gen_range(self.min_secs..=self.max_secs))
    }
}
