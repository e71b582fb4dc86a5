use std::ops::Add;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use sync_core::clock::{Clock, MonotonicInstant};
use sync_core::protocol::Timestamp;

/// Monotonic host instant.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct HostInstant(Instant);

impl HostInstant {
    #[must_use]
    pub fn now() -> Self {
        Self(Instant::now())
    }
}

impl Add<Duration> for HostInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        // Configured deadlines are capped well below the platform limit.
        self.0.checked_add(rhs).map_or(self, Self)
    }
}

impl MonotonicInstant for HostInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }
}

/// System clock that blocks the calling thread on `sleep`.
#[derive(Copy, Clone, Debug, Default)]
pub struct HostClock;

impl Clock for HostClock {
    type Instant = HostInstant;

    fn now(&self) -> Self::Instant {
        HostInstant::now()
    }

    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Current wall-clock time in Unix seconds.
#[must_use]
pub fn unix_now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            Timestamp::try_from(elapsed.as_secs()).unwrap_or(Timestamp::MAX)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instants_order_and_measure() {
        let start = HostInstant::now();
        let later = start + Duration::from_millis(5);
        assert!(later > start);
        assert_eq!(later.saturating_duration_since(start), Duration::from_millis(5));
        assert_eq!(start.saturating_duration_since(later), Duration::ZERO);
    }

    #[test]
    fn wall_clock_is_after_2020() {
        assert!(unix_now() > 1_577_836_800);
    }
}
