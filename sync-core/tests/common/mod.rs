#![allow(dead_code)]

use core::fmt;
use core::ops::Add;
use core::time::Duration;
use std::collections::{BTreeMap, VecDeque};

use sync_core::Context;
use sync_core::bridge::{BridgeLink, BridgeValue};
use sync_core::clock::{Clock, MonotonicInstant, PollInterval};
use sync_core::protocol::{UPDATE, UpdateFlag};
use sync_core::store::{MemoryStateStore, StateRecord};
use sync_core::supervisor::SupervisorConfig;
use sync_core::telemetry::RingArchive;
use sync_core::transition::{HistoryPolicy, TransitionConfig};

/// Transport failure injected by [`ScriptedBridge::go_offline`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LinkDown;

impl fmt::Display for LinkDown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("link down")
    }
}

/// Bridge double that records host writes and plays back scripted reads.
///
/// The device side is simulated by per-key read scripts and an optional
/// auto-acknowledgment that lowers `UPDATE` after a number of reads.
#[derive(Debug, Default)]
pub struct ScriptedBridge {
    values: BTreeMap<String, String>,
    scripts: BTreeMap<String, VecDeque<Option<String>>>,
    writes: Vec<(String, String)>,
    reads: Vec<String>,
    ack_after: Option<usize>,
    update_reads: usize,
    offline: bool,
}

impl ScriptedBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a device-side value without recording a host write.
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.set(key, value);
        self
    }

    /// Lowers `UPDATE` on the `reads`-th read after each host post.
    pub fn acknowledge_after(mut self, reads: usize) -> Self {
        self.ack_after = Some(reads);
        self
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_owned(), value.to_owned());
    }

    pub fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Queues values returned by the next reads of `key`; `None` reads as absent.
    pub fn script(&mut self, key: &str, reads: &[Option<&str>]) {
        self.scripts
            .entry(key.to_owned())
            .or_default()
            .extend(reads.iter().map(|value| value.map(str::to_owned)));
    }

    pub fn go_offline(&mut self) {
        self.offline = true;
    }

    pub fn go_online(&mut self) {
        self.offline = false;
    }

    pub fn writes(&self) -> Vec<(&str, &str)> {
        self.writes
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect()
    }

    pub fn writes_to(&self, key: &str) -> Vec<&str> {
        self.writes
            .iter()
            .filter(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
            .collect()
    }

    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }

    pub fn reads_of(&self, key: &str) -> usize {
        self.reads.iter().filter(|name| *name == key).count()
    }

    fn simulate_device(&mut self, key: &str) {
        if let Some(next) = self.scripts.get_mut(key).and_then(VecDeque::pop_front) {
            match next {
                Some(value) => self.set(key, &value),
                None => self.remove(key),
            }
        }

        if key == UPDATE && self.value(UPDATE) == Some(UpdateFlag::Pending.as_str()) {
            if let Some(after) = self.ack_after {
                self.update_reads += 1;
                if self.update_reads > after {
                    self.set(UPDATE, UpdateFlag::Acknowledged.as_str());
                }
            }
        }
    }
}

impl BridgeLink for ScriptedBridge {
    type Error = LinkDown;

    fn get(&mut self, key: &str) -> Result<Option<BridgeValue>, Self::Error> {
        if self.offline {
            return Err(LinkDown);
        }
        self.reads.push(key.to_owned());
        self.simulate_device(key);
        Ok(self
            .value(key)
            .map(|value| BridgeValue::try_from(value).expect("value fits")))
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), Self::Error> {
        if self.offline {
            return Err(LinkDown);
        }
        self.writes.push((key.to_owned(), value.to_owned()));
        if key == UPDATE {
            self.update_reads = 0;
        }
        self.set(key, value);
        Ok(())
    }
}

/// Microsecond instant driven by [`FakeClock`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct FakeInstant(u64);

impl Add<Duration> for FakeInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        let micros = u64::try_from(rhs.as_micros()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(micros))
    }
}

impl MonotonicInstant for FakeInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

/// Clock whose `sleep` advances time instantly.
#[derive(Debug, Default)]
pub struct FakeClock {
    now: FakeInstant,
    sleeps: Vec<Duration>,
}

impl FakeClock {
    pub fn elapsed(&self) -> Duration {
        self.now.saturating_duration_since(FakeInstant::default())
    }

    pub fn sleeps(&self) -> &[Duration] {
        &self.sleeps
    }

    pub fn clear_sleeps(&mut self) {
        self.sleeps.clear();
    }
}

impl Clock for FakeClock {
    type Instant = FakeInstant;

    fn now(&self) -> Self::Instant {
        self.now
    }

    fn sleep(&mut self, duration: Duration) {
        self.sleeps.push(duration);
        self.now = self.now + duration;
    }
}

pub type TestStore = MemoryStateStore<16>;
pub type TestArchive = RingArchive<16>;
pub type TestContext = Context<ScriptedBridge, TestStore, TestArchive, FakeClock>;

pub fn store(history: &[(i64, i64)], queue: &[(i64, i64)]) -> TestStore {
    let mut store = TestStore::new();
    for (posted_at, state_id) in history {
        store
            .record(StateRecord::new(*posted_at, *state_id))
            .expect("history row");
    }
    for (posted_at, state_id) in queue {
        store
            .enqueue(StateRecord::new(*posted_at, *state_id))
            .expect("queue row");
    }
    store
}

pub fn context(bridge: ScriptedBridge, store: TestStore) -> TestContext {
    Context::new(bridge, store, TestArchive::new(), FakeClock::default())
}

pub const ACK_POLL: Duration = Duration::from_millis(100);

/// Short deadlines so timeout paths finish in a handful of fake sleeps.
pub fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        startup_wait: Duration::from_secs(10),
        queue_timeout: Duration::from_secs(2),
        recovery_wait: Duration::from_secs(20),
        transition_timeout: Duration::from_secs(2),
        health_poll: Duration::from_secs(1),
        cycle_interval: Duration::from_millis(50),
        fault_backoff: Duration::from_secs(1),
        transition: TransitionConfig::new(PollInterval::fixed(ACK_POLL), HistoryPolicy::StartupOnly),
    }
}
