mod common;

use common::{ScriptedBridge, context, store};
use sync_core::Fault;
use sync_core::protocol::{
    DATA_TIMESTAMP, DEFAULT_SAMPLE_KEY, ProtocolError, ProtocolField, Timestamp,
};
use sync_core::telemetry::{IngestOutcome, TelemetryIngest};

fn timestamps_of(ctx: &common::TestContext) -> Vec<Timestamp> {
    ctx.archive.samples().map(|sample| sample.timestamp).collect()
}

#[test]
fn repeated_timestamps_forward_once() {
    let mut bridge = ScriptedBridge::new().with(DEFAULT_SAMPLE_KEY, "7.5");
    bridge.script(DATA_TIMESTAMP, &[Some("100"), Some("100"), Some("150")]);
    let mut ctx = context(bridge, store(&[], &[]));
    let ingest = TelemetryIngest::default();

    let mut last_seen = 100;
    for _ in 0..3 {
        last_seen = ingest.ingest(&mut ctx, last_seen).expect("ingest").last_seen();
    }

    assert_eq!(last_seen, 150);
    assert_eq!(timestamps_of(&ctx), vec![150]);
    assert_eq!(ctx.archive.latest().map(|sample| sample.value), Some(7.5));
    assert!(ctx.clock.sleeps().is_empty(), "ingest never waits");
}

#[test]
fn each_advance_forwards_a_sample() {
    let mut bridge = ScriptedBridge::new().with(DEFAULT_SAMPLE_KEY, "1");
    bridge.script(DATA_TIMESTAMP, &[Some("100"), Some("100"), Some("150")]);
    let mut ctx = context(bridge, store(&[], &[]));
    let ingest = TelemetryIngest::default();

    let mut last_seen = 0;
    let mut forwarded = 0;
    for _ in 0..3 {
        let outcome = ingest.ingest(&mut ctx, last_seen).expect("ingest");
        if matches!(outcome, IngestOutcome::Forwarded(_)) {
            forwarded += 1;
        }
        last_seen = outcome.last_seen();
    }

    assert_eq!(forwarded, 2);
    assert_eq!(timestamps_of(&ctx), vec![100, 150]);
}

#[test]
fn sample_is_not_read_until_timestamp_advances() {
    let bridge = ScriptedBridge::new()
        .with(DATA_TIMESTAMP, "100")
        .with(DEFAULT_SAMPLE_KEY, "3");
    let mut ctx = context(bridge, store(&[], &[]));

    let outcome = TelemetryIngest::default()
        .ingest(&mut ctx, 100)
        .expect("ingest");

    assert_eq!(outcome, IngestOutcome::Idle { last_seen: 100 });
    assert_eq!(ctx.bridge.reads_of(DEFAULT_SAMPLE_KEY), 0);
}

#[test]
fn missing_sample_after_advance_is_a_fault() {
    let bridge = ScriptedBridge::new().with(DATA_TIMESTAMP, "200");
    let mut ctx = context(bridge, store(&[], &[]));

    let result = TelemetryIngest::default().ingest(&mut ctx, 100);

    assert_eq!(
        result,
        Err(Fault::Protocol(ProtocolError::Missing(
            ProtocolField::SampleValue
        )))
    );
    assert!(ctx.archive.is_empty());
}
