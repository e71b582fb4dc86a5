//! State transition handshake.
//!
//! A transition posts the requested state id, raises the `UPDATE` flag, and
//! waits for the device to lower it again. Only an acknowledged transition
//! touches the store; a timed-out one leaves every row in place so the next
//! cycle can try again.

use core::fmt;
use core::time::Duration;

use crate::bridge::{BridgeLink, DeviceRegisters};
use crate::clock::{Clock, Poll, PollInterval, poll_until};
use crate::context::Context;
use crate::fault::{ContextFault, Fault};
use crate::protocol::{StateId, UpdateFlag};
use crate::store::{PendingTransition, StateRecord, StateStore, TransitionCommit, TransitionSource};
use crate::telemetry::TelemetryArchive;

/// Default first delay between acknowledgment checks.
pub const DEFAULT_ACK_POLL: Duration = Duration::from_millis(50);
/// Default ceiling for the acknowledgment backoff.
pub const DEFAULT_ACK_POLL_MAX: Duration = Duration::from_millis(400);

/// Which acknowledged transitions are written to history.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum HistoryPolicy {
    /// Only startup re-assertions append history rows.
    #[default]
    StartupOnly,
    /// Queue transitions are recorded as well.
    AllApplied,
}

/// Tuning for [`TransitionEngine`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TransitionConfig {
    pub poll: PollInterval,
    pub history: HistoryPolicy,
}

impl TransitionConfig {
    #[must_use]
    pub const fn new(poll: PollInterval, history: HistoryPolicy) -> Self {
        Self { poll, history }
    }

    /// Whether an acknowledged transition from `source` appends a history row.
    #[must_use]
    pub const fn records_history(&self, source: TransitionSource) -> bool {
        match self.history {
            HistoryPolicy::StartupOnly => matches!(source, TransitionSource::InitialState),
            HistoryPolicy::AllApplied => true,
        }
    }
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self::new(
            PollInterval::backoff(DEFAULT_ACK_POLL, DEFAULT_ACK_POLL_MAX),
            HistoryPolicy::default(),
        )
    }
}

/// Expected results of [`TransitionEngine::apply`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransitionOutcome {
    /// Device acknowledged and the store was updated.
    Applied {
        previous: Option<StateId>,
        applied: StateRecord,
    },
    /// Device already reports the requested state; nothing was written.
    NoOp { state_id: StateId },
    /// Acknowledgment did not arrive in time; nothing was committed.
    TimedOut { requested: PendingTransition },
}

impl fmt::Display for TransitionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied {
                previous: Some(previous),
                applied,
            } => write!(f, "state {previous} -> {}", applied.state_id),
            Self::Applied {
                previous: None,
                applied,
            } => write!(f, "state unset -> {}", applied.state_id),
            Self::NoOp { state_id } => write!(f, "state {state_id} already current"),
            Self::TimedOut { requested } => write!(
                f,
                "state {} posted at {} not acknowledged",
                requested.state_id, requested.posted_at
            ),
        }
    }
}

/// Drives one state change end to end.
#[derive(Copy, Clone, Debug, Default)]
pub struct TransitionEngine {
    config: TransitionConfig,
}

impl TransitionEngine {
    #[must_use]
    pub const fn new(config: TransitionConfig) -> Self {
        Self { config }
    }

    /// Applies `request` and waits up to `timeout` for the acknowledgment.
    ///
    /// `STATE_ID` is always written before `UPDATE` so the device never sees a
    /// raised flag next to a stale id. A device that reports no state id never
    /// matches a request.
    ///
    /// # Errors
    ///
    /// Returns a [`Fault`] when the link, the value grammar, or the store fails.
    pub fn apply<L, S, A, C>(
        &self,
        ctx: &mut Context<L, S, A, C>,
        request: PendingTransition,
        source: TransitionSource,
        timeout: Duration,
    ) -> Result<TransitionOutcome, ContextFault<L, S, A>>
    where
        L: BridgeLink,
        S: StateStore,
        A: TelemetryArchive,
        C: Clock,
    {
        let previous = ctx.bridge.state_id()?;
        if previous == Some(request.state_id) {
            return Ok(TransitionOutcome::NoOp {
                state_id: request.state_id,
            });
        }

        ctx.bridge.put_state_id(request.state_id)?;
        ctx.bridge.put_update_flag(UpdateFlag::Pending)?;

        let bridge = &mut ctx.bridge;
        let acknowledged = poll_until(
            &mut ctx.clock,
            timeout,
            self.config.poll,
            || -> Result<Option<()>, ContextFault<L, S, A>> {
                let flag = bridge.update_flag()?;
                Ok((flag == Some(UpdateFlag::Acknowledged)).then_some(()))
            },
        )?;

        if acknowledged == Poll::TimedOut {
            return Ok(TransitionOutcome::TimedOut { requested: request });
        }

        let commit = TransitionCommit {
            applied: request,
            source,
            record_history: self.config.records_history(source),
        };
        ctx.store.commit(&commit).map_err(Fault::Store)?;

        Ok(TransitionOutcome::Applied {
            previous,
            applied: request,
        })
    }
}
