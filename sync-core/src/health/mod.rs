//! Device liveness and readiness checks.

use core::fmt;
use core::time::Duration;

use crate::bridge::{BridgeLink, DeviceRegisters};
use crate::clock::{Clock, Poll, PollInterval, poll_until};
use crate::context::Context;
use crate::fault::ContextFault;
use crate::protocol::DeviceStatus;
use crate::store::StateStore;
use crate::telemetry::TelemetryArchive;

/// Default delay between `ARDUINO_STATUS` reads while waiting.
pub const DEFAULT_HEALTH_POLL: Duration = Duration::from_secs(1);

/// How ready the device must be for a wait to finish.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Requirement {
    /// Any sign of life: the device process is booting or running.
    Responding,
    /// The device accepts transitions.
    Running,
}

impl Requirement {
    /// Returns `true` when `status` satisfies the requirement.
    #[must_use]
    pub const fn is_met(self, status: DeviceStatus) -> bool {
        match self {
            Self::Responding => status.is_responding(),
            Self::Running => status.is_running(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Responding => "responding",
            Self::Running => "running",
        })
    }
}

/// Result of [`HealthMonitor::wait_for_device`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HealthOutcome {
    /// Requirement met; carries the status that satisfied it.
    Ready(DeviceStatus),
    /// Deadline elapsed; carries the last status observed.
    TimedOut { last: DeviceStatus },
}

/// Polls `ARDUINO_STATUS` on a fixed interval.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct HealthMonitor {
    poll: PollInterval,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll: PollInterval::fixed(poll_interval),
        }
    }

    /// Classifies the current device status with a single read.
    ///
    /// # Errors
    ///
    /// Returns a fault when the link fails or reports an unknown status.
    pub fn status<L, S, A, C>(
        &self,
        ctx: &mut Context<L, S, A, C>,
    ) -> Result<DeviceStatus, ContextFault<L, S, A>>
    where
        L: BridgeLink,
        S: StateStore,
        A: TelemetryArchive,
    {
        Ok(ctx.bridge.device_status()?)
    }

    /// Waits up to `timeout` for the device to meet `requirement`.
    ///
    /// # Errors
    ///
    /// Returns a fault when the link fails or reports an unknown status.
    pub fn wait_for_device<L, S, A, C>(
        &self,
        ctx: &mut Context<L, S, A, C>,
        requirement: Requirement,
        timeout: Duration,
    ) -> Result<HealthOutcome, ContextFault<L, S, A>>
    where
        L: BridgeLink,
        S: StateStore,
        A: TelemetryArchive,
        C: Clock,
    {
        let bridge = &mut ctx.bridge;
        let mut last = DeviceStatus::Absent;
        let outcome = poll_until(
            &mut ctx.clock,
            timeout,
            self.poll,
            || -> Result<Option<DeviceStatus>, ContextFault<L, S, A>> {
                last = bridge.device_status()?;
                Ok(requirement.is_met(last).then_some(last))
            },
        )?;

        Ok(match outcome {
            Poll::Ready(status) => HealthOutcome::Ready(status),
            Poll::TimedOut => HealthOutcome::TimedOut { last },
        })
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_HEALTH_POLL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_device_never_meets_a_requirement() {
        assert!(!Requirement::Responding.is_met(DeviceStatus::Absent));
        assert!(!Requirement::Running.is_met(DeviceStatus::Absent));
    }

    #[test]
    fn loading_counts_only_as_responding() {
        assert!(Requirement::Responding.is_met(DeviceStatus::Loading));
        assert!(!Requirement::Running.is_met(DeviceStatus::Loading));
        assert!(Requirement::Running.is_met(DeviceStatus::Running));
    }
}
