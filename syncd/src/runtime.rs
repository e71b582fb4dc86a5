//! Daemon wiring: builds the host context and renders supervisor steps as logs.

use std::convert::Infallible;

use sync_core::protocol::{ProtocolError, StateId, Timestamp};
use sync_core::store::{PendingTransition, StateRecord, StateStore};
use sync_core::telemetry::TelemetryIngest;
use sync_core::transition::TransitionOutcome;
use sync_core::{Context, ContextFault, Step, Supervisor, SupervisorEvent};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::archive::{ArchiveError, RrdArchive};
use crate::bridge::{BridgeError, TcpJsonBridge};
use crate::clock::{HostClock, unix_now};
use crate::config::{ConfigError, DaemonConfig};
use crate::logging::LoggingError;
use crate::store::{SqliteStateStore, SqliteStoreError};

pub type HostContext = Context<TcpJsonBridge, SqliteStateStore, RrdArchive, HostClock>;
pub type HostFault = ContextFault<TcpJsonBridge, SqliteStateStore, RrdArchive>;
pub type HostSupervisor = Supervisor<TcpJsonBridge, SqliteStateStore, RrdArchive, HostClock>;

/// Failures that stop the daemon before or outside the supervisor loop.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    Store(#[from] SqliteStoreError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("invalid sample key: {0}")]
    SampleKey(ProtocolError),
}

/// Opens the state store, provisioning it when empty.
///
/// # Errors
///
/// Returns [`DaemonError::Store`] when the database cannot be opened.
pub fn open_store(config: &DaemonConfig) -> Result<SqliteStateStore, DaemonError> {
    Ok(SqliteStateStore::open(
        &config.store.path,
        config.store.busy_timeout(),
        unix_now(),
    )?)
}

/// Opens the telemetry archive, creating the file when missing.
///
/// # Errors
///
/// Returns [`DaemonError::Archive`] when `rrdtool create` fails.
pub fn open_archive(config: &DaemonConfig) -> Result<RrdArchive, DaemonError> {
    let archive = RrdArchive::new(config.archive.rrdtool.clone(), config.archive.path.clone());
    archive.provision(unix_now(), &config.archive.layout())?;
    Ok(archive)
}

/// Builds the bridge, store, archive and clock bundle.
///
/// # Errors
///
/// Returns [`DaemonError`] when any adapter fails to open.
pub fn build_context(config: &DaemonConfig) -> Result<HostContext, DaemonError> {
    let bridge = TcpJsonBridge::resolve(&config.bridge.address, config.bridge.io_timeout())?;
    let store = open_store(config)?;
    let archive = open_archive(config)?;
    info!(
        bridge = %bridge.address(),
        store = %config.store.path.display(),
        archive = %archive.path().display(),
        "adapters ready"
    );
    Ok(Context::new(bridge, store, archive, HostClock))
}

/// Runs the supervisor loop; returns only when setup fails.
///
/// # Errors
///
/// Returns [`DaemonError`] when the adapters cannot be built.
pub fn run(config: &DaemonConfig) -> Result<Infallible, DaemonError> {
    let ingest = TelemetryIngest::new(&config.bridge.sample_key).map_err(DaemonError::SampleKey)?;
    let ctx = build_context(config)?;
    let last_seen = unix_now();
    let mut supervisor = HostSupervisor::new(ctx, config.supervisor_config(), ingest, last_seen);
    info!(
        sample_key = %config.bridge.sample_key,
        last_seen,
        "supervisor starting"
    );
    supervisor.run(report)
}

/// Logs every event of a step.
pub fn report(step: &Step<HostFault>) {
    for event in &step.events {
        match event {
            SupervisorEvent::DeviceReady {
                requirement,
                status,
            } => info!(%requirement, ?status, "device ready"),
            SupervisorEvent::DeviceWaitTimedOut { requirement, last } => {
                warn!(%requirement, last = ?last, "device wait timed out");
            }
            SupervisorEvent::DeviceStateInitialized => {
                info!("device had no state id; published unset id");
            }
            SupervisorEvent::Transition { source, outcome } => match outcome {
                TransitionOutcome::Applied { .. } => info!(%source, "{outcome}"),
                TransitionOutcome::NoOp { .. } => debug!(%source, "{outcome}"),
                TransitionOutcome::TimedOut { .. } => error!(%source, "{outcome}"),
            },
            SupervisorEvent::DeviceLost(status) => error!(?status, "device lost"),
            SupervisorEvent::TimeoutAbsorbed => {
                warn!("acknowledgment timeout absorbed; request stays queued");
            }
            SupervisorEvent::SampleArchived(sample) => {
                debug!(timestamp = sample.timestamp, value = sample.value, "sample archived");
            }
            SupervisorEvent::HostStatus(status) => {
                info!(status = status.as_str(), "host status published");
            }
            SupervisorEvent::Fault(fault) => error!(kind = fault.kind(), "{fault}"),
        }
    }
    if step.changed_state() {
        info!(from = %step.from, to = %step.to, "supervisor state changed");
    }
}

/// Provisions the store and archive without starting the loop.
///
/// # Errors
///
/// Returns [`DaemonError`] when either adapter fails to provision.
pub fn init(config: &DaemonConfig) -> Result<(), DaemonError> {
    open_store(config)?;
    open_archive(config)?;
    Ok(())
}

/// Snapshot of the state store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreSummary {
    pub current: Option<StateRecord>,
    pub pending: Vec<PendingTransition>,
}

/// Reads the current state and the pending queue.
///
/// # Errors
///
/// Returns [`DaemonError::Store`] when the store cannot be read.
pub fn status(config: &DaemonConfig) -> Result<StoreSummary, DaemonError> {
    let mut store = open_store(config)?;
    Ok(StoreSummary {
        current: store.latest_state()?,
        pending: store.pending()?,
    })
}

/// Queues a request for `state_id`, posted at `posted_at` or now.
///
/// `now` has one-second resolution; a request sharing its second with the one
/// being applied is collapsed along with it.
///
/// # Errors
///
/// Returns [`DaemonError::Store`] when the insert fails.
pub fn request(
    config: &DaemonConfig,
    state_id: StateId,
    posted_at: Option<Timestamp>,
) -> Result<PendingTransition, DaemonError> {
    let request = StateRecord::new(posted_at.unwrap_or_else(unix_now), state_id);
    open_store(config)?.enqueue(request)?;
    info!(state_id, posted_at = request.posted_at, "state request queued");
    Ok(request)
}
