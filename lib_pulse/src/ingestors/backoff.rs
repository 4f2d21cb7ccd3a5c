//! Capped exponential reconnect delay.

use std::time::Duration;

pub const DEFAULT_BACKOFF_FLOOR: Duration = Duration::from_millis(1000);
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_millis(30000);

/// Doubles after every scheduled attempt, never exceeds `cap`, and only
/// goes back to `floor` through [`Backoff::reset`].
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(floor: Duration, cap: Duration) -> Self {
        let cap = cap.max(floor);
        Self {
            floor,
            cap,
            current: floor,
        }
    }

    /// Delay for the attempt being scheduled now; advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.cap);
        self.current = self.current.saturating_mul(2).min(self.cap);
        delay
    }

    /// Delay the next scheduled attempt would get.
    pub fn peek(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_FLOOR, DEFAULT_BACKOFF_CAP)
    }
}
