//! Monotonic time, deadlines, and bounded polling.
//!
//! Every wait in the daemon is a loop that re-reads the clock, compares it to a
//! deadline captured at entry, and sleeps a non-zero delay between probes.
//! Hosts plug in a real clock; tests plug in one whose `sleep` just advances
//! time.

use core::ops::Add;
use core::time::Duration;

/// Smallest delay a poll loop will ever sleep.
pub const MIN_POLL_DELAY: Duration = Duration::from_millis(1);

/// Monotonic instant used for deadline arithmetic.
pub trait MonotonicInstant: Copy + Ord + Add<Duration, Output = Self> {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Source of monotonic time that can also suspend the caller.
pub trait Clock {
    /// Instant type produced by this clock.
    type Instant: MonotonicInstant;

    /// Returns the current instant.
    fn now(&self) -> Self::Instant;

    /// Suspends the caller for `duration`.
    fn sleep(&mut self, duration: Duration);
}

impl<C> Clock for &mut C
where
    C: Clock + ?Sized,
{
    type Instant = C::Instant;

    fn now(&self) -> Self::Instant {
        (**self).now()
    }

    fn sleep(&mut self, duration: Duration) {
        (**self).sleep(duration);
    }
}

/// Point in time after which a wait gives up.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Deadline<I> {
    expires_at: I,
}

impl<I> Deadline<I>
where
    I: MonotonicInstant,
{
    /// Creates a deadline `timeout` after `now`.
    pub fn after(now: I, timeout: Duration) -> Self {
        Self {
            expires_at: now + timeout,
        }
    }

    /// Returns `true` once `now` reaches the deadline.
    pub fn has_expired(&self, now: I) -> bool {
        now >= self.expires_at
    }

    /// Returns the time left before expiry (zero once expired).
    pub fn remaining(&self, now: I) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

/// Inter-poll delay policy: fixed when `initial == max`, doubling otherwise.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PollInterval {
    initial: Duration,
    max: Duration,
}

impl PollInterval {
    /// Creates a fixed interval.
    #[must_use]
    pub fn fixed(interval: Duration) -> Self {
        Self::backoff(interval, interval)
    }

    /// Creates an exponential backoff from `initial` up to `max`.
    #[must_use]
    pub fn backoff(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(MIN_POLL_DELAY);
        Self {
            initial,
            max: max.max(initial),
        }
    }

    /// Returns the first delay.
    #[must_use]
    pub const fn initial(&self) -> Duration {
        self.initial
    }

    /// Returns the delay ceiling.
    #[must_use]
    pub const fn max(&self) -> Duration {
        self.max
    }

    /// Starts a fresh delay sequence.
    #[must_use]
    pub const fn start(&self) -> PollDelays {
        PollDelays {
            next: self.initial,
            max: self.max,
        }
    }
}

/// Iterator-like sequence of delays produced by a [`PollInterval`].
#[derive(Copy, Clone, Debug)]
pub struct PollDelays {
    next: Duration,
    max: Duration,
}

impl PollDelays {
    /// Returns the next delay and advances the backoff.
    pub fn next_delay(&mut self) -> Duration {
        let current = self.next;
        self.next = current.saturating_mul(2).min(self.max);
        current
    }
}

/// Result of a bounded wait.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Poll<T> {
    /// Probe succeeded before the deadline.
    Ready(T),
    /// Deadline elapsed first.
    TimedOut,
}

/// Repeatedly runs `probe` until it yields a value or `timeout` elapses.
///
/// The probe always runs at least once. Sleeps never extend past the deadline.
///
/// # Errors
///
/// Propagates the first error returned by `probe`.
pub fn poll_until<C, T, E, F>(
    clock: &mut C,
    timeout: Duration,
    interval: PollInterval,
    mut probe: F,
) -> Result<Poll<T>, E>
where
    C: Clock + ?Sized,
    F: FnMut() -> Result<Option<T>, E>,
{
    let deadline = Deadline::after(clock.now(), timeout);
    let mut delays = interval.start();

    loop {
        if let Some(value) = probe()? {
            return Ok(Poll::Ready(value));
        }

        let now = clock.now();
        if deadline.has_expired(now) {
            return Ok(Poll::TimedOut);
        }

        let pause = delays
            .next_delay()
            .min(deadline.remaining(now))
            .max(MIN_POLL_DELAY);
        clock.sleep(pause);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::Vec;

    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
    struct MillisInstant(u64);

    impl Add<Duration> for MillisInstant {
        type Output = Self;

        fn add(self, rhs: Duration) -> Self::Output {
            Self(self.0 + u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX))
        }
    }

    impl MonotonicInstant for MillisInstant {
        fn saturating_duration_since(&self, earlier: Self) -> Duration {
            Duration::from_millis(self.0.saturating_sub(earlier.0))
        }
    }

    #[derive(Default)]
    struct StepClock {
        now: MillisInstant,
        sleeps: Vec<Duration, 32>,
    }

    impl Clock for StepClock {
        type Instant = MillisInstant;

        fn now(&self) -> Self::Instant {
            self.now
        }

        fn sleep(&mut self, duration: Duration) {
            let _ = self.sleeps.push(duration);
            self.now = self.now + duration;
        }
    }

    #[test]
    fn deadline_expires_at_boundary() {
        let deadline = Deadline::after(MillisInstant(100), Duration::from_millis(50));
        assert!(!deadline.has_expired(MillisInstant(149)));
        assert!(deadline.has_expired(MillisInstant(150)));
        assert_eq!(
            deadline.remaining(MillisInstant(120)),
            Duration::from_millis(30)
        );
        assert_eq!(deadline.remaining(MillisInstant(500)), Duration::ZERO);
    }

    #[test]
    fn backoff_doubles_until_ceiling() {
        let interval = PollInterval::backoff(Duration::from_millis(10), Duration::from_millis(35));
        let mut delays = interval.start();
        assert_eq!(delays.next_delay(), Duration::from_millis(10));
        assert_eq!(delays.next_delay(), Duration::from_millis(20));
        assert_eq!(delays.next_delay(), Duration::from_millis(35));
        assert_eq!(delays.next_delay(), Duration::from_millis(35));
    }

    #[test]
    fn zero_interval_is_clamped() {
        let interval = PollInterval::fixed(Duration::ZERO);
        assert_eq!(interval.initial(), MIN_POLL_DELAY);
        assert_eq!(interval.max(), MIN_POLL_DELAY);
    }

    #[test]
    fn poll_times_out_without_overshooting() {
        let mut clock = StepClock::default();
        let result: Result<Poll<()>, ()> = poll_until(
            &mut clock,
            Duration::from_millis(250),
            PollInterval::fixed(Duration::from_millis(100)),
            || Ok(None),
        );

        assert_eq!(result, Ok(Poll::TimedOut));
        assert_eq!(clock.now, MillisInstant(250));
        assert_eq!(
            clock.sleeps.as_slice(),
            &[
                Duration::from_millis(100),
                Duration::from_millis(100),
                Duration::from_millis(50)
            ]
        );
    }

    #[test]
    fn poll_returns_first_ready_value() {
        let mut clock = StepClock::default();
        let mut probes = 0_u32;
        let result: Result<Poll<u32>, ()> = poll_until(
            &mut clock,
            Duration::from_secs(1),
            PollInterval::fixed(Duration::from_millis(10)),
            || {
                probes += 1;
                Ok((probes == 3).then_some(probes))
            },
        );

        assert_eq!(result, Ok(Poll::Ready(3)));
        assert_eq!(clock.sleeps.len(), 2);
    }

    #[test]
    fn poll_propagates_probe_errors() {
        let mut clock = StepClock::default();
        let result: Result<Poll<()>, &str> = poll_until(
            &mut clock,
            Duration::from_secs(1),
            PollInterval::fixed(Duration::from_millis(10)),
            || Err("link down"),
        );

        assert_eq!(result, Err("link down"));
        assert!(clock.sleeps.is_empty());
    }
}
