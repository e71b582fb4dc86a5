//! Bridge key catalog and value grammar.
//!
//! Every value exchanged with the device travels as text. This module names the
//! keys both sides agree on and parses their values into typed enums using
//! `winnow` combinators, so malformed values surface as [`ProtocolError`]s
//! instead of silently comparing unequal.

use core::fmt::{self, Write as _};

use heapless::String;
use winnow::ascii::{dec_int, multispace0};
use winnow::combinator::{alt, delimited};
use winnow::error::ContextError;
use winnow::prelude::*;
use winnow::token::take_while;

/// Device-side lifecycle status (`device→host`).
pub const ARDUINO_STATUS: &str = "ARDUINO_STATUS";
/// Host-side lifecycle status (`host→device`).
pub const YUN_STATUS: &str = "YUN_STATUS";
/// Current or target state identifier.
pub const STATE_ID: &str = "STATE_ID";
/// Pending-update handshake flag.
pub const UPDATE: &str = "UPDATE";
/// Timestamp of the newest sensor sample.
pub const DATA_TIMESTAMP: &str = "DATA_TIMESTAMP";
/// Key carrying the sensor reading unless configured otherwise.
pub const DEFAULT_SAMPLE_KEY: &str = "LED_99";

/// Integer identifying a discrete operating mode of the device.
pub type StateId = i64;

/// Seconds since the Unix epoch.
pub type Timestamp = i64;

/// State pushed to the device before any transition has been requested.
pub const INITIAL_STATE_ID: StateId = 99;

/// Value written to `STATE_ID` when the device reports no state at all.
pub const UNSET_STATE_ID: StateId = 0;

/// Longest rendering of an `i64` including the sign.
pub const MAX_INTEGER_TEXT: usize = 20;

/// Device lifecycle reported through [`ARDUINO_STATUS`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DeviceStatus {
    /// Key never set; the device process has not started.
    Absent,
    /// Device process is booting.
    Loading,
    /// Device is ready to accept transitions.
    Running,
}

impl DeviceStatus {
    /// Returns `true` once the device accepts transitions.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns `true` when the device process answers at all.
    #[must_use]
    pub const fn is_responding(self) -> bool {
        matches!(self, Self::Loading | Self::Running)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Absent => "ABSENT",
            Self::Loading => "LOADING",
            Self::Running => "RUNNING",
        })
    }
}

/// Host lifecycle published through [`YUN_STATUS`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HostStatus {
    Loading,
    Running,
    Error,
}

impl HostStatus {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Loading => "LOADING",
            Self::Running => "RUNNING",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handshake flag stored under [`UPDATE`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UpdateFlag {
    /// Host posted a new state id the device has not applied yet.
    Pending,
    /// Device applied the posted state id.
    Acknowledged,
}

impl UpdateFlag {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "True",
            Self::Acknowledged => "False",
        }
    }
}

/// Bridge field a [`ProtocolError`] refers to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProtocolField {
    DeviceStatus,
    StateId,
    UpdateFlag,
    DataTimestamp,
    SampleValue,
}

impl fmt::Display for ProtocolField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DeviceStatus => ARDUINO_STATUS,
            Self::StateId => STATE_ID,
            Self::UpdateFlag => UPDATE,
            Self::DataTimestamp => DATA_TIMESTAMP,
            Self::SampleValue => "sample value",
        })
    }
}

/// Malformed or missing bridge value.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProtocolError {
    /// Value present but does not match the field grammar.
    Malformed(ProtocolField),
    /// Value required but absent.
    Missing(ProtocolField),
    /// Key or value exceeds the bridge capacity.
    Overflow,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(field) => write!(f, "malformed {field} value"),
            Self::Missing(field) => write!(f, "missing {field} value"),
            Self::Overflow => f.write_str("bridge key or value exceeds capacity"),
        }
    }
}

fn device_status(input: &mut &str) -> Result<DeviceStatus, ContextError> {
    alt((
        "LOADING".value(DeviceStatus::Loading),
        "RUNNING".value(DeviceStatus::Running),
    ))
    .parse_next(input)
}

fn update_flag(input: &mut &str) -> Result<UpdateFlag, ContextError> {
    alt((
        "True".value(UpdateFlag::Pending),
        "False".value(UpdateFlag::Acknowledged),
    ))
    .parse_next(input)
}

fn integer(input: &mut &str) -> Result<i64, ContextError> {
    delimited(multispace0, dec_int, multispace0).parse_next(input)
}

fn decimal(input: &mut &str) -> Result<f64, ContextError> {
    delimited(
        multispace0,
        take_while(1.., |c: char| {
            c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')
        })
        .try_map(str::parse::<f64>),
        multispace0,
    )
    .parse_next(input)
}

/// Classifies a raw `ARDUINO_STATUS` value; absent maps to [`DeviceStatus::Absent`].
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] for unrecognized status tokens.
pub fn parse_device_status(raw: Option<&str>) -> Result<DeviceStatus, ProtocolError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(DeviceStatus::Absent),
        Some(value) => device_status
            .parse(value)
            .map_err(|_| ProtocolError::Malformed(ProtocolField::DeviceStatus)),
    }
}

/// Parses the `UPDATE` handshake flag.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] for anything other than `True`/`False`.
pub fn parse_update_flag(raw: &str) -> Result<UpdateFlag, ProtocolError> {
    update_flag
        .parse(raw.trim())
        .map_err(|_| ProtocolError::Malformed(ProtocolField::UpdateFlag))
}

/// Parses a `STATE_ID` value.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] when the value is not a decimal integer.
pub fn parse_state_id(raw: &str) -> Result<StateId, ProtocolError> {
    integer
        .parse(raw)
        .map_err(|_| ProtocolError::Malformed(ProtocolField::StateId))
}

/// Parses a `DATA_TIMESTAMP` value.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] when the value is not a decimal integer.
pub fn parse_timestamp(raw: &str) -> Result<Timestamp, ProtocolError> {
    integer
        .parse(raw)
        .map_err(|_| ProtocolError::Malformed(ProtocolField::DataTimestamp))
}

/// Parses a sensor reading.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] when the value is not a decimal number.
pub fn parse_sample_value(raw: &str) -> Result<f64, ProtocolError> {
    decimal
        .parse(raw)
        .map_err(|_| ProtocolError::Malformed(ProtocolField::SampleValue))
}

/// Renders an integer for transmission over the bridge.
#[must_use]
pub fn format_integer(value: i64) -> String<MAX_INTEGER_TEXT> {
    let mut text = String::new();
    // 20 bytes hold every i64 including the sign.
    let _ = write!(text, "{value}");
    text
}
