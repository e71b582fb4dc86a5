//! TOML configuration for the daemon.
//!
//! Resolution order: an explicit `--config` path, then `SYNCD_CONFIG`, then
//! `syncd.toml` in the working directory. Explicit and environment paths must
//! exist; a missing default file yields the built-in defaults.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use sync_core::SupervisorConfig;
use sync_core::bridge::MAX_KEY_LEN;
use sync_core::clock::PollInterval;
use sync_core::transition::{HistoryPolicy, TransitionConfig};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::archive::ArchiveLayout;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "SYNCD_CONFIG";
/// Config file used when neither flag nor environment names one.
pub const DEFAULT_CONFIG_PATH: &str = "syncd.toml";

/// Upper bound for every configured wait.
const MAX_DEADLINE_SECS: u64 = 86_400;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub bridge: BridgeConfig,
    pub store: StoreConfig,
    pub archive: ArchiveConfig,
    pub timing: TimingConfig,
    pub history: HistoryConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// `host:port` of the bridge JSON service.
    pub address: String,
    pub io_timeout_ms: u64,
    /// Mailbox key carrying the telemetry reading.
    pub sample_key: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:5700".to_owned(),
            io_timeout_ms: 10_000,
            sample_key: "LED_99".to_owned(),
        }
    }
}

impl BridgeConfig {
    #[must_use]
    pub const fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("stateful.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiveConfig {
    pub path: PathBuf,
    /// Program invoked for `create` and `update`.
    pub rrdtool: String,
    pub step_secs: u64,
    pub data_sources: Vec<String>,
    pub archives: Vec<String>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("sensor.rrd"),
            rrdtool: "rrdtool".to_owned(),
            step_secs: 5,
            data_sources: vec!["DS:LED_99:GAUGE:10:0:U".to_owned()],
            archives: vec![
                "RRA:AVERAGE:0.5:1:120".to_owned(),
                "RRA:AVERAGE:0.5:12:60".to_owned(),
            ],
        }
    }
}

impl ArchiveConfig {
    #[must_use]
    pub fn layout(&self) -> ArchiveLayout {
        ArchiveLayout {
            step_secs: self.step_secs,
            data_sources: self.data_sources.clone(),
            archives: self.archives.clone(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TimingConfig {
    pub startup_wait_secs: u64,
    pub queue_timeout_secs: u64,
    pub recovery_wait_secs: u64,
    pub transition_timeout_secs: u64,
    pub ack_poll_ms: u64,
    pub ack_poll_max_ms: u64,
    pub health_poll_ms: u64,
    pub cycle_interval_ms: u64,
    pub fault_backoff_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            startup_wait_secs: 120,
            queue_timeout_secs: 30,
            recovery_wait_secs: 300,
            transition_timeout_secs: 30,
            ack_poll_ms: 50,
            ack_poll_max_ms: 400,
            health_poll_ms: 1_000,
            cycle_interval_ms: 0,
            fault_backoff_ms: 1_000,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct HistoryConfig {
    /// Also append acknowledged queue transitions to the history table.
    pub record_queue_transitions: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log file; stderr when unset.
    pub path: Option<PathBuf>,
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            path: None,
            level: "info".to_owned(),
        }
    }
}

impl FromStr for DaemonConfig {
    type Err = toml::de::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        toml::from_str(raw)
    }
}

impl DaemonConfig {
    /// Loads and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a named file is missing or unreadable,
    /// fails to parse, or holds invalid values.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = resolve_config_path(explicit);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if !required && err.kind() == io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        let config: Self = raw
            .parse()
            .map_err(|source| ConfigError::Parse { path, source })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges that the TOML types cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bridge = &self.bridge;
        if bridge.address.trim().is_empty() {
            return Err(ConfigError::invalid("bridge.address", "must not be empty"));
        }
        if bridge.io_timeout_ms == 0 {
            return Err(ConfigError::invalid("bridge.io_timeout_ms", "must be positive"));
        }
        if bridge.sample_key.is_empty() {
            return Err(ConfigError::invalid("bridge.sample_key", "must not be empty"));
        }
        if bridge.sample_key.len() > MAX_KEY_LEN {
            return Err(ConfigError::invalid(
                "bridge.sample_key",
                format!("must be at most {MAX_KEY_LEN} bytes"),
            ));
        }

        let timing = &self.timing;
        for (field, secs) in [
            ("timing.startup_wait_secs", timing.startup_wait_secs),
            ("timing.queue_timeout_secs", timing.queue_timeout_secs),
            ("timing.recovery_wait_secs", timing.recovery_wait_secs),
            ("timing.transition_timeout_secs", timing.transition_timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::invalid(field, "must be positive"));
            }
            if secs > MAX_DEADLINE_SECS {
                return Err(ConfigError::invalid(
                    field,
                    format!("must be at most {MAX_DEADLINE_SECS} seconds"),
                ));
            }
        }
        for (field, ms) in [
            ("timing.ack_poll_ms", timing.ack_poll_ms),
            ("timing.health_poll_ms", timing.health_poll_ms),
        ] {
            if ms == 0 {
                return Err(ConfigError::invalid(field, "must be positive"));
            }
        }
        if timing.ack_poll_max_ms < timing.ack_poll_ms {
            return Err(ConfigError::invalid(
                "timing.ack_poll_max_ms",
                "must not be below timing.ack_poll_ms",
            ));
        }

        let archive = &self.archive;
        if archive.step_secs == 0 {
            return Err(ConfigError::invalid("archive.step_secs", "must be positive"));
        }
        if archive.data_sources.is_empty() {
            return Err(ConfigError::invalid("archive.data_sources", "must not be empty"));
        }
        if archive.archives.is_empty() {
            return Err(ConfigError::invalid("archive.archives", "must not be empty"));
        }

        EnvFilter::try_new(&self.logging.level)
            .map_err(|err| ConfigError::invalid("logging.level", err.to_string()))?;
        Ok(())
    }

    /// Supervisor deadlines and pacing.
    #[must_use]
    pub fn supervisor_config(&self) -> SupervisorConfig {
        let timing = &self.timing;
        let history = if self.history.record_queue_transitions {
            HistoryPolicy::AllApplied
        } else {
            HistoryPolicy::StartupOnly
        };
        SupervisorConfig {
            startup_wait: Duration::from_secs(timing.startup_wait_secs),
            queue_timeout: Duration::from_secs(timing.queue_timeout_secs),
            recovery_wait: Duration::from_secs(timing.recovery_wait_secs),
            transition_timeout: Duration::from_secs(timing.transition_timeout_secs),
            health_poll: Duration::from_millis(timing.health_poll_ms),
            cycle_interval: Duration::from_millis(timing.cycle_interval_ms),
            fault_backoff: Duration::from_millis(timing.fault_backoff_ms),
            transition: TransitionConfig::new(
                PollInterval::backoff(
                    Duration::from_millis(timing.ack_poll_ms),
                    Duration::from_millis(timing.ack_poll_max_ms),
                ),
                history,
            ),
        }
    }
}

/// Picks the config path and whether it has to exist.
fn resolve_config_path(explicit: Option<&Path>) -> (PathBuf, bool) {
    if let Some(path) = explicit {
        return (path.to_path_buf(), true);
    }
    if let Some(path) = env::var_os(CONFIG_ENV).filter(|value| !value.is_empty()) {
        return (PathBuf::from(path), true);
    }
    (PathBuf::from(DEFAULT_CONFIG_PATH), false)
}
