//! Round-robin telemetry archive driven through the `rrdtool` command.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use sync_core::protocol::Timestamp;
use sync_core::telemetry::{TelemetryArchive, TelemetrySample};
use thiserror::Error;
use tracing::{debug, info};

/// Archive command failures.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} {action} exited with {status}: {stderr}")]
    Failed {
        program: String,
        action: &'static str,
        status: ExitStatus,
        stderr: String,
    },
}

/// Layout used when the archive file has to be created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveLayout {
    pub step_secs: u64,
    pub data_sources: Vec<String>,
    pub archives: Vec<String>,
}

/// Arguments for `rrdtool create`.
#[must_use]
pub fn create_args(path: &Path, start: Timestamp, layout: &ArchiveLayout) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "create".into(),
        path.into(),
        "--start".into(),
        start.to_string().into(),
        "--step".into(),
        layout.step_secs.to_string().into(),
    ];
    args.extend(layout.data_sources.iter().map(OsString::from));
    args.extend(layout.archives.iter().map(OsString::from));
    args
}

/// Arguments for `rrdtool update`.
#[must_use]
pub fn update_args(path: &Path, sample: &TelemetrySample) -> Vec<OsString> {
    vec![
        "update".into(),
        path.into(),
        format!("{}:{}", sample.timestamp, sample.value).into(),
    ]
}

/// [`TelemetryArchive`] appending to an RRD file.
#[derive(Clone, Debug)]
pub struct RrdArchive {
    program: String,
    path: PathBuf,
}

impl RrdArchive {
    #[must_use]
    pub fn new(program: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            path: path.into(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the archive file when it does not exist yet.
    ///
    /// Returns `true` when a new file was created.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] when `rrdtool create` cannot run or fails.
    pub fn provision(&self, start: Timestamp, layout: &ArchiveLayout) -> Result<bool, ArchiveError> {
        if self.path.exists() {
            debug!(path = %self.path.display(), "archive already present");
            return Ok(false);
        }
        self.invoke("create", create_args(&self.path, start, layout))?;
        info!(path = %self.path.display(), step_secs = layout.step_secs, "created telemetry archive");
        Ok(true)
    }

    fn invoke(&self, action: &'static str, args: Vec<OsString>) -> Result<(), ArchiveError> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|source| ArchiveError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if output.status.success() {
            return Ok(());
        }
        Err(ArchiveError::Failed {
            program: self.program.clone(),
            action,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}

impl TelemetryArchive for RrdArchive {
    type Error = ArchiveError;

    fn append(&mut self, sample: TelemetrySample) -> Result<(), Self::Error> {
        self.invoke("update", update_args(&self.path, &sample))
    }
}
