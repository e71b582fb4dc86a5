//! Sensor telemetry forwarding.
//!
//! The device publishes its newest reading under a sample key together with
//! `DATA_TIMESTAMP`. [`TelemetryIngest`] compares that timestamp against the
//! last one forwarded and appends each new reading to a [`TelemetryArchive`]
//! exactly once.

use core::convert::Infallible;

use heapless::{HistoryBuf, OldestOrdered, String};

use crate::bridge::{BridgeLink, DeviceRegisters, MAX_KEY_LEN};
use crate::context::Context;
use crate::fault::{ContextFault, Fault};
use crate::protocol::{DEFAULT_SAMPLE_KEY, ProtocolError, Timestamp};
use crate::store::StateStore;

/// Single sensor reading.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TelemetrySample {
    pub timestamp: Timestamp,
    pub value: f64,
}

/// Append-only time series for sensor readings.
pub trait TelemetryArchive {
    /// Archive failure type.
    type Error;

    /// Appends one reading.
    ///
    /// # Errors
    ///
    /// Returns the archive error when the sample cannot be stored.
    fn append(&mut self, sample: TelemetrySample) -> Result<(), Self::Error>;
}

impl<A> TelemetryArchive for &mut A
where
    A: TelemetryArchive + ?Sized,
{
    type Error = A::Error;

    fn append(&mut self, sample: TelemetrySample) -> Result<(), Self::Error> {
        (**self).append(sample)
    }
}

/// Rolling in-memory archive keeping the newest `N` samples.
pub struct RingArchive<const N: usize> {
    samples: HistoryBuf<TelemetrySample, N>,
}

impl<const N: usize> RingArchive<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            samples: HistoryBuf::new(),
        }
    }

    /// Returns the most recent sample.
    #[must_use]
    pub fn latest(&self) -> Option<&TelemetrySample> {
        self.samples.recent()
    }

    /// Iterates retained samples oldest first.
    pub fn samples(&self) -> OldestOrdered<'_, TelemetrySample> {
        self.samples.oldest_ordered()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl<const N: usize> Default for RingArchive<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> TelemetryArchive for RingArchive<N> {
    type Error = Infallible;

    fn append(&mut self, sample: TelemetrySample) -> Result<(), Self::Error> {
        self.samples.write(sample);
        Ok(())
    }
}

/// Result of one ingest pass.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum IngestOutcome {
    /// No newer sample; the cursor is unchanged.
    Idle { last_seen: Timestamp },
    /// A newer sample was archived.
    Forwarded(TelemetrySample),
}

impl IngestOutcome {
    /// Timestamp to pass into the next pass.
    #[must_use]
    pub const fn last_seen(&self) -> Timestamp {
        match self {
            Self::Idle { last_seen } => *last_seen,
            Self::Forwarded(sample) => sample.timestamp,
        }
    }
}

/// Detects new samples by timestamp advance and forwards them.
#[derive(Clone, Debug)]
pub struct TelemetryIngest {
    sample_key: String<MAX_KEY_LEN>,
}

impl TelemetryIngest {
    /// Creates an ingest reading samples from `sample_key`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Overflow`] when the key exceeds the bridge key capacity.
    pub fn new(sample_key: &str) -> Result<Self, ProtocolError> {
        let mut key = String::new();
        key.push_str(sample_key)
            .map_err(|_| ProtocolError::Overflow)?;
        Ok(Self { sample_key: key })
    }

    /// Bridge key the reading is read from.
    #[must_use]
    pub fn sample_key(&self) -> &str {
        &self.sample_key
    }

    /// Checks for a reading newer than `last_seen` and archives it.
    ///
    /// Reads `DATA_TIMESTAMP` once and, only when it advanced, the sample key
    /// once. Never waits.
    ///
    /// # Errors
    ///
    /// Returns a [`Fault`] when the link, the value grammar, or the archive fails.
    pub fn ingest<L, S, A, C>(
        &self,
        ctx: &mut Context<L, S, A, C>,
        last_seen: Timestamp,
    ) -> Result<IngestOutcome, ContextFault<L, S, A>>
    where
        L: BridgeLink,
        S: StateStore,
        A: TelemetryArchive,
    {
        let Some(timestamp) = ctx.bridge.data_timestamp()? else {
            return Ok(IngestOutcome::Idle { last_seen });
        };
        if timestamp <= last_seen {
            return Ok(IngestOutcome::Idle { last_seen });
        }

        let value = ctx.bridge.sample_value(&self.sample_key)?;
        let sample = TelemetrySample { timestamp, value };
        ctx.archive.append(sample).map_err(Fault::Archive)?;
        Ok(IngestOutcome::Forwarded(sample))
    }
}

impl Default for TelemetryIngest {
    fn default() -> Self {
        let mut sample_key = String::new();
        // The default key is a short compile-time constant.
        let _ = sample_key.push_str(DEFAULT_SAMPLE_KEY);
        Self { sample_key }
    }
}
