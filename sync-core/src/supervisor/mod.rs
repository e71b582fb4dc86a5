//! Daemon state machine.
//!
//! The supervisor owns the [`Context`] and advances one state per call to
//! [`Supervisor::step`]. Every expected condition (device not ready yet,
//! acknowledgment timeout, device lost) maps to a named state with its own
//! recovery; anything unexpected becomes a [`Fault`] that routes through
//! [`SupervisorState::DegradedError`] back to a full resynchronization. The
//! supervisor never logs. Each step returns the events it produced and the
//! host decides how to render them.

use core::fmt;
use core::time::Duration;

use heapless::Vec;

use crate::bridge::{BridgeLink, DeviceRegisters};
use crate::clock::Clock;
use crate::context::Context;
use crate::fault::{ContextFault, Fault};
use crate::health::{DEFAULT_HEALTH_POLL, HealthMonitor, HealthOutcome, Requirement};
use crate::protocol::{DeviceStatus, HostStatus, Timestamp, UNSET_STATE_ID};
use crate::store::{StateStore, TransitionSource};
use crate::telemetry::{IngestOutcome, TelemetryArchive, TelemetryIngest, TelemetrySample};
use crate::transition::{TransitionConfig, TransitionEngine, TransitionOutcome};

/// Upper bound on events a single step can produce.
pub const MAX_STEP_EVENTS: usize = 6;

/// Supervisor lifecycle states. There is no terminal state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SupervisorState {
    /// Waiting for the device and re-asserting the newest history row.
    Startup,
    /// Draining the queue and forwarding telemetry.
    Steady,
    /// A queued transition was not acknowledged in time.
    RecoveringTimeout,
    /// The device stopped reporting `RUNNING`.
    RecoveringDeviceLost,
    /// An unclassified fault occurred.
    DegradedError,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Startup => "startup",
            Self::Steady => "steady",
            Self::RecoveringTimeout => "recovering-timeout",
            Self::RecoveringDeviceLost => "recovering-device-lost",
            Self::DegradedError => "degraded-error",
        })
    }
}

/// Deadlines and pacing for the supervisor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SupervisorConfig {
    /// Cold-start wait for any sign of life.
    pub startup_wait: Duration,
    /// Acknowledgment deadline for queued transitions.
    pub queue_timeout: Duration,
    /// Wait for `RUNNING` after the device was lost.
    pub recovery_wait: Duration,
    /// Acknowledgment deadline for the startup re-assertion.
    pub transition_timeout: Duration,
    pub health_poll: Duration,
    /// Optional pause after each steady cycle; zero (the default) loops straight back.
    pub cycle_interval: Duration,
    /// Pause before leaving the degraded state.
    pub fault_backoff: Duration,
    pub transition: TransitionConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            startup_wait: Duration::from_secs(120),
            queue_timeout: Duration::from_secs(30),
            recovery_wait: Duration::from_secs(300),
            transition_timeout: Duration::from_secs(30),
            health_poll: DEFAULT_HEALTH_POLL,
            cycle_interval: Duration::ZERO,
            fault_backoff: Duration::from_secs(1),
            transition: TransitionConfig::default(),
        }
    }
}

/// Observable effect of a step.
#[derive(Clone, Debug, PartialEq)]
pub enum SupervisorEvent<F> {
    DeviceReady {
        requirement: Requirement,
        status: DeviceStatus,
    },
    DeviceWaitTimedOut {
        requirement: Requirement,
        last: DeviceStatus,
    },
    /// Device had no state id; host published `LOADING` and the unset id.
    DeviceStateInitialized,
    Transition {
        source: TransitionSource,
        outcome: TransitionOutcome,
    },
    DeviceLost(DeviceStatus),
    /// Unacknowledged queue transition left pending for the next cycle.
    TimeoutAbsorbed,
    SampleArchived(TelemetrySample),
    HostStatus(HostStatus),
    Fault(F),
}

/// Outcome of one [`Supervisor::step`].
#[derive(Clone, Debug, PartialEq)]
pub struct Step<F> {
    pub from: SupervisorState,
    pub to: SupervisorState,
    pub events: Vec<SupervisorEvent<F>, MAX_STEP_EVENTS>,
}

impl<F> Step<F> {
    /// Returns `true` when the step changed state.
    #[must_use]
    pub fn changed_state(&self) -> bool {
        self.from != self.to
    }
}

type Events<F> = Vec<SupervisorEvent<F>, MAX_STEP_EVENTS>;

fn record<F>(events: &mut Events<F>, event: SupervisorEvent<F>) {
    // The longest path (resync with initialization plus a late fault) emits
    // fewer events than the capacity.
    let _ = events.push(event);
}

/// Drives startup, steady polling, and recovery.
pub struct Supervisor<L, S, A, C> {
    ctx: Context<L, S, A, C>,
    config: SupervisorConfig,
    engine: TransitionEngine,
    health: HealthMonitor,
    ingest: TelemetryIngest,
    state: SupervisorState,
    last_seen: Timestamp,
}

impl<L, S, A, C> Supervisor<L, S, A, C>
where
    L: BridgeLink,
    S: StateStore,
    A: TelemetryArchive,
    C: Clock,
{
    /// Creates a supervisor in [`SupervisorState::Startup`].
    ///
    /// Samples stamped at or before `last_seen` are never forwarded.
    pub fn new(
        ctx: Context<L, S, A, C>,
        config: SupervisorConfig,
        ingest: TelemetryIngest,
        last_seen: Timestamp,
    ) -> Self {
        Self {
            ctx,
            engine: TransitionEngine::new(config.transition),
            health: HealthMonitor::new(config.health_poll),
            config,
            ingest,
            state: SupervisorState::Startup,
            last_seen,
        }
    }

    #[must_use]
    pub const fn state(&self) -> SupervisorState {
        self.state
    }

    /// Timestamp of the newest forwarded sample.
    #[must_use]
    pub const fn last_seen(&self) -> Timestamp {
        self.last_seen
    }

    #[must_use]
    pub const fn context(&self) -> &Context<L, S, A, C> {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context<L, S, A, C> {
        &mut self.ctx
    }

    /// Runs the current state once and moves to the next.
    pub fn step(&mut self) -> Step<ContextFault<L, S, A>> {
        let from = self.state;
        let mut events = Events::new();

        let result = match from {
            SupervisorState::Startup => {
                self.synchronize(Requirement::Responding, self.config.startup_wait, &mut events)
            }
            SupervisorState::Steady => self.steady_cycle(&mut events),
            SupervisorState::RecoveringTimeout => {
                record(&mut events, SupervisorEvent::TimeoutAbsorbed);
                Ok(SupervisorState::Steady)
            }
            SupervisorState::RecoveringDeviceLost => {
                self.synchronize(Requirement::Running, self.config.recovery_wait, &mut events)
            }
            SupervisorState::DegradedError => Ok(self.degrade(&mut events)),
        };

        let to = result.unwrap_or_else(|fault| {
            record(&mut events, SupervisorEvent::Fault(fault));
            SupervisorState::DegradedError
        });
        self.state = to;

        Step { from, to, events }
    }

    /// Steps forever, handing each step to `observer`.
    pub fn run<O>(&mut self, mut observer: O) -> !
    where
        O: FnMut(&Step<ContextFault<L, S, A>>),
    {
        loop {
            let step = self.step();
            observer(&step);
        }
    }

    /// Waits for the device, then re-asserts the newest history row.
    ///
    /// Stays in the current state when the device or the acknowledgment does
    /// not arrive in time.
    fn synchronize(
        &mut self,
        requirement: Requirement,
        wait: Duration,
        events: &mut Events<ContextFault<L, S, A>>,
    ) -> Result<SupervisorState, ContextFault<L, S, A>> {
        let retry = self.state;

        match self
            .health
            .wait_for_device(&mut self.ctx, requirement, wait)?
        {
            HealthOutcome::Ready(status) => {
                record(events, SupervisorEvent::DeviceReady { requirement, status });
            }
            HealthOutcome::TimedOut { last } => {
                record(events, SupervisorEvent::DeviceWaitTimedOut { requirement, last });
                return Ok(retry);
            }
        }

        let latest = self
            .ctx
            .store
            .latest_state()
            .map_err(Fault::Store)?
            .ok_or(Fault::MissingHistory)?;

        if self.ctx.bridge.state_id()?.is_none() {
            self.ctx.bridge.put_host_status(HostStatus::Loading)?;
            self.ctx.bridge.put_state_id(UNSET_STATE_ID)?;
            record(events, SupervisorEvent::DeviceStateInitialized);
        }

        // The newest history row is re-asserted even when the device already
        // reports a different valid state. If history lags the device this
        // rolls the device back; equal ids resolve to a no-op.
        let outcome = self.engine.apply(
            &mut self.ctx,
            latest,
            TransitionSource::InitialState,
            self.config.transition_timeout,
        )?;
        record(
            events,
            SupervisorEvent::Transition {
                source: TransitionSource::InitialState,
                outcome,
            },
        );
        if let TransitionOutcome::TimedOut { .. } = outcome {
            return Ok(retry);
        }

        self.ctx.bridge.put_host_status(HostStatus::Running)?;
        record(events, SupervisorEvent::HostStatus(HostStatus::Running));
        Ok(SupervisorState::Steady)
    }

    fn steady_cycle(
        &mut self,
        events: &mut Events<ContextFault<L, S, A>>,
    ) -> Result<SupervisorState, ContextFault<L, S, A>> {
        let status = self.health.status(&mut self.ctx)?;
        if !status.is_running() {
            record(events, SupervisorEvent::DeviceLost(status));
            return Ok(SupervisorState::RecoveringDeviceLost);
        }

        if let Some(request) = self.ctx.store.latest_pending().map_err(Fault::Store)? {
            let outcome = self.engine.apply(
                &mut self.ctx,
                request,
                TransitionSource::UpdateQueue,
                self.config.queue_timeout,
            )?;
            record(
                events,
                SupervisorEvent::Transition {
                    source: TransitionSource::UpdateQueue,
                    outcome,
                },
            );
            if let TransitionOutcome::TimedOut { .. } = outcome {
                return Ok(SupervisorState::RecoveringTimeout);
            }
        }

        let ingested = self.ingest.ingest(&mut self.ctx, self.last_seen)?;
        self.last_seen = ingested.last_seen();
        if let IngestOutcome::Forwarded(sample) = ingested {
            record(events, SupervisorEvent::SampleArchived(sample));
        }

        if !self.config.cycle_interval.is_zero() {
            self.ctx.clock.sleep(self.config.cycle_interval);
        }
        Ok(SupervisorState::Steady)
    }

    /// Publishes `ERROR`, backs off, and restarts synchronization.
    ///
    /// A failure to publish is reported but does not block the restart.
    fn degrade(&mut self, events: &mut Events<ContextFault<L, S, A>>) -> SupervisorState {
        match self.ctx.bridge.put_host_status(HostStatus::Error) {
            Ok(()) => record(events, SupervisorEvent::HostStatus(HostStatus::Error)),
            Err(err) => record(events, SupervisorEvent::Fault(err.into())),
        }

        if !self.config.fault_backoff.is_zero() {
            self.ctx.clock.sleep(self.config.fault_backoff);
        }
        SupervisorState::Startup
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_daemon_timings() {
        let config = SupervisorConfig::default();
        assert_eq!(config.startup_wait, Duration::from_secs(120));
        assert_eq!(config.queue_timeout, Duration::from_secs(30));
        assert_eq!(config.recovery_wait, Duration::from_secs(300));
        assert_eq!(config.cycle_interval, Duration::ZERO);
    }

    #[test]
    fn state_labels_are_kebab_case() {
        let mut label = heapless::String::<32>::new();
        core::fmt::write(
            &mut label,
            format_args!("{}", SupervisorState::RecoveringDeviceLost),
        )
        .expect("write");
        assert_eq!(label.as_str(), "recovering-device-lost");
    }
}
