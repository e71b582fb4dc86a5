mod common;

use core::time::Duration;

use common::{ScriptedBridge, context, store};
use sync_core::Fault;
use sync_core::health::{HealthMonitor, HealthOutcome, Requirement};
use sync_core::protocol::{ARDUINO_STATUS, DeviceStatus, ProtocolError, ProtocolField};

const POLL: Duration = Duration::from_millis(500);

#[test]
fn loading_device_counts_as_responding() {
    let mut bridge = ScriptedBridge::new();
    bridge.script(ARDUINO_STATUS, &[None, None, Some("LOADING")]);
    let mut ctx = context(bridge, store(&[], &[]));

    let outcome = HealthMonitor::new(POLL)
        .wait_for_device(&mut ctx, Requirement::Responding, Duration::from_secs(5))
        .expect("wait");

    assert_eq!(outcome, HealthOutcome::Ready(DeviceStatus::Loading));
    assert_eq!(ctx.clock.sleeps(), &[POLL, POLL]);
}

#[test]
fn running_requirement_ignores_loading() {
    let bridge = ScriptedBridge::new().with(ARDUINO_STATUS, "LOADING");
    let mut ctx = context(bridge, store(&[], &[]));

    let outcome = HealthMonitor::new(POLL)
        .wait_for_device(&mut ctx, Requirement::Running, Duration::from_secs(3))
        .expect("wait");

    assert_eq!(
        outcome,
        HealthOutcome::TimedOut {
            last: DeviceStatus::Loading
        }
    );
    assert_eq!(ctx.clock.elapsed(), Duration::from_secs(3));
    assert!(ctx.clock.sleeps().iter().all(|pause| *pause == POLL));
}

#[test]
fn running_device_satisfies_running_requirement() {
    let mut bridge = ScriptedBridge::new();
    bridge.script(ARDUINO_STATUS, &[Some("LOADING"), Some("RUNNING")]);
    let mut ctx = context(bridge, store(&[], &[]));

    let outcome = HealthMonitor::new(POLL)
        .wait_for_device(&mut ctx, Requirement::Running, Duration::from_secs(3))
        .expect("wait");

    assert_eq!(outcome, HealthOutcome::Ready(DeviceStatus::Running));
    assert_eq!(ctx.bridge.reads_of(ARDUINO_STATUS), 2);
}

#[test]
fn silent_device_times_out_as_absent() {
    let mut ctx = context(ScriptedBridge::new(), store(&[], &[]));

    let outcome = HealthMonitor::new(POLL)
        .wait_for_device(&mut ctx, Requirement::Responding, Duration::from_secs(2))
        .expect("wait");

    assert_eq!(
        outcome,
        HealthOutcome::TimedOut {
            last: DeviceStatus::Absent
        }
    );
}

#[test]
fn unknown_status_is_a_fault() {
    let bridge = ScriptedBridge::new().with(ARDUINO_STATUS, "REBOOTING");
    let mut ctx = context(bridge, store(&[], &[]));

    let result =
        HealthMonitor::new(POLL).wait_for_device(&mut ctx, Requirement::Running, Duration::from_secs(2));

    assert_eq!(
        result,
        Err(Fault::Protocol(ProtocolError::Malformed(
            ProtocolField::DeviceStatus
        )))
    );
}

#[test]
fn status_check_reads_once_without_sleeping() {
    let bridge = ScriptedBridge::new().with(ARDUINO_STATUS, "RUNNING");
    let mut ctx = context(bridge, store(&[], &[]));

    let status = HealthMonitor::default().status(&mut ctx).expect("status");

    assert_eq!(status, DeviceStatus::Running);
    assert_eq!(ctx.bridge.reads_of(ARDUINO_STATUS), 1);
    assert!(ctx.clock.sleeps().is_empty());
}
