//! Key/value link to the device and typed register access on top of it.
//!
//! The transport only moves text. [`DeviceRegisters`] layers the key catalog
//! from [`crate::protocol`] over any [`BridgeLink`], normalizing empty values
//! to absent and parsing the rest, so the transition engine and health monitor
//! never touch raw strings.

use core::fmt;

use heapless::{String, Vec};

use crate::protocol::{
    self, DeviceStatus, HostStatus, ProtocolError, ProtocolField, StateId, Timestamp, UpdateFlag,
};

/// Longest key accepted by [`MemoryBridge`].
pub const MAX_KEY_LEN: usize = 32;
/// Longest value carried across the link.
pub const MAX_VALUE_LEN: usize = 64;

/// Owned value read from the link.
pub type BridgeValue = String<MAX_VALUE_LEN>;

/// Key/value channel shared with the device.
pub trait BridgeLink {
    /// Transport failure type.
    type Error;

    /// Reads `key`; `None` when the device never set it.
    ///
    /// # Errors
    ///
    /// Returns the transport error when the link cannot be reached.
    fn get(&mut self, key: &str) -> Result<Option<BridgeValue>, Self::Error>;

    /// Writes `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns the transport error when the link cannot be reached.
    fn put(&mut self, key: &str, value: &str) -> Result<(), Self::Error>;
}

impl<L> BridgeLink for &mut L
where
    L: BridgeLink + ?Sized,
{
    type Error = L::Error;

    fn get(&mut self, key: &str) -> Result<Option<BridgeValue>, Self::Error> {
        (**self).get(key)
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), Self::Error> {
        (**self).put(key, value)
    }
}

/// Failure reading or writing a typed register.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegisterError<E> {
    /// Transport failed.
    Link(E),
    /// Transport succeeded but the value did not parse.
    Protocol(ProtocolError),
}

impl<E> fmt::Display for RegisterError<E>
where
    E: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Link(err) => write!(f, "bridge link error: {err}"),
            Self::Protocol(err) => write!(f, "bridge protocol error: {err}"),
        }
    }
}

/// Typed accessors for the registers both sides agree on.
///
/// Implemented for every [`BridgeLink`]. Empty values read back as absent.
pub trait DeviceRegisters: BridgeLink {
    /// Reads `key`, mapping empty or whitespace-only values to `None`.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::Link`] when the transport fails.
    fn read(&mut self, key: &str) -> Result<Option<BridgeValue>, RegisterError<Self::Error>> {
        let value = self.get(key).map_err(RegisterError::Link)?;
        Ok(value.filter(|text| !text.trim().is_empty()))
    }

    /// Classifies `ARDUINO_STATUS`.
    ///
    /// # Errors
    ///
    /// Returns a link error or [`ProtocolError::Malformed`] for unknown tokens.
    fn device_status(&mut self) -> Result<DeviceStatus, RegisterError<Self::Error>> {
        let raw = self.read(protocol::ARDUINO_STATUS)?;
        protocol::parse_device_status(raw.as_deref()).map_err(RegisterError::Protocol)
    }

    /// Reads the state id the device currently reports.
    ///
    /// # Errors
    ///
    /// Returns a link error or a malformed-integer protocol error.
    fn state_id(&mut self) -> Result<Option<StateId>, RegisterError<Self::Error>> {
        self.read(protocol::STATE_ID)?
            .map(|raw| protocol::parse_state_id(&raw))
            .transpose()
            .map_err(RegisterError::Protocol)
    }

    /// Reads the handshake flag; `None` when the key is unset.
    ///
    /// # Errors
    ///
    /// Returns a link error or a malformed-flag protocol error.
    fn update_flag(&mut self) -> Result<Option<UpdateFlag>, RegisterError<Self::Error>> {
        self.read(protocol::UPDATE)?
            .map(|raw| protocol::parse_update_flag(&raw))
            .transpose()
            .map_err(RegisterError::Protocol)
    }

    /// Reads the timestamp of the newest sample; `None` before the first one.
    ///
    /// # Errors
    ///
    /// Returns a link error or a malformed-integer protocol error.
    fn data_timestamp(&mut self) -> Result<Option<Timestamp>, RegisterError<Self::Error>> {
        self.read(protocol::DATA_TIMESTAMP)?
            .map(|raw| protocol::parse_timestamp(&raw))
            .transpose()
            .map_err(RegisterError::Protocol)
    }

    /// Reads a sensor value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns a link error, [`ProtocolError::Missing`] when unset, or a
    /// malformed-value protocol error.
    fn sample_value(&mut self, key: &str) -> Result<f64, RegisterError<Self::Error>> {
        let raw = self.read(key)?.ok_or(RegisterError::Protocol(ProtocolError::Missing(
            ProtocolField::SampleValue,
        )))?;
        protocol::parse_sample_value(&raw).map_err(RegisterError::Protocol)
    }

    /// Publishes the host lifecycle status.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::Link`] when the transport fails.
    fn put_host_status(&mut self, status: HostStatus) -> Result<(), RegisterError<Self::Error>> {
        self.put(protocol::YUN_STATUS, status.as_str())
            .map_err(RegisterError::Link)
    }

    /// Writes `STATE_ID`.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::Link`] when the transport fails.
    fn put_state_id(&mut self, state_id: StateId) -> Result<(), RegisterError<Self::Error>> {
        let text = protocol::format_integer(state_id);
        self.put(protocol::STATE_ID, &text)
            .map_err(RegisterError::Link)
    }

    /// Writes the `UPDATE` handshake flag.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::Link`] when the transport fails.
    fn put_update_flag(&mut self, flag: UpdateFlag) -> Result<(), RegisterError<Self::Error>> {
        self.put(protocol::UPDATE, flag.as_str())
            .map_err(RegisterError::Link)
    }
}

impl<L> DeviceRegisters for L where L: BridgeLink + ?Sized {}

/// Capacity failures of [`MemoryBridge`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MemoryBridgeError {
    KeyTooLong,
    ValueTooLong,
    Full,
}

impl fmt::Display for MemoryBridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::KeyTooLong => "key exceeds bridge capacity",
            Self::ValueTooLong => "value exceeds bridge capacity",
            Self::Full => "bridge table full",
        })
    }
}

/// Fixed-capacity in-memory key/value table.
///
/// Test double for the device mailbox; the daemon always talks to a real
/// bridge.
#[derive(Clone, Debug, Default)]
pub struct MemoryBridge<const N: usize> {
    entries: Vec<(String<MAX_KEY_LEN>, BridgeValue), N>,
}

impl<const N: usize> MemoryBridge<N> {
    /// Creates an empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Returns the stored value for `key`.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(name, _)| name.as_str() == key)
            .map(|(_, value)| value.as_str())
    }

    /// Deletes `key`, returning whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.entries.iter().position(|(name, _)| name.as_str() == key) {
            Some(index) => {
                self.entries.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Stores `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns a [`MemoryBridgeError`] when the key, value, or table overflows.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), MemoryBridgeError> {
        let mut stored = BridgeValue::new();
        stored
            .push_str(value)
            .map_err(|_| MemoryBridgeError::ValueTooLong)?;

        if let Some((_, slot)) = self
            .entries
            .iter_mut()
            .find(|(name, _)| name.as_str() == key)
        {
            *slot = stored;
            return Ok(());
        }

        let mut name = String::new();
        name.push_str(key)
            .map_err(|_| MemoryBridgeError::KeyTooLong)?;
        self.entries
            .push((name, stored))
            .map_err(|_| MemoryBridgeError::Full)
    }
}

impl<const N: usize> BridgeLink for MemoryBridge<N> {
    type Error = MemoryBridgeError;

    fn get(&mut self, key: &str) -> Result<Option<BridgeValue>, Self::Error> {
        Ok(self
            .entries
            .iter()
            .find(|(name, _)| name.as_str() == key)
            .map(|(_, value)| value.clone()))
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), Self::Error> {
        self.set(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_values_read_as_absent() {
        let mut bridge = MemoryBridge::<8>::new();
        bridge.set(protocol::STATE_ID, "").expect("set");
        bridge.set(protocol::ARDUINO_STATUS, "  ").expect("set");

        assert_eq!(bridge.state_id(), Ok(None));
        assert_eq!(bridge.device_status(), Ok(DeviceStatus::Absent));
        assert_eq!(bridge.data_timestamp(), Ok(None));
    }

    #[test]
    fn typed_writes_use_wire_format() {
        let mut bridge = MemoryBridge::<8>::new();
        bridge.put_state_id(-12).expect("state id");
        bridge
            .put_update_flag(UpdateFlag::Pending)
            .expect("update flag");
        bridge
            .put_host_status(HostStatus::Error)
            .expect("host status");

        assert_eq!(bridge.value(protocol::STATE_ID), Some("-12"));
        assert_eq!(bridge.value(protocol::UPDATE), Some("True"));
        assert_eq!(bridge.value(protocol::YUN_STATUS), Some("ERROR"));
        assert_eq!(bridge.state_id(), Ok(Some(-12)));
        assert_eq!(bridge.update_flag(), Ok(Some(UpdateFlag::Pending)));
    }

    #[test]
    fn malformed_values_surface_protocol_errors() {
        let mut bridge = MemoryBridge::<8>::new();
        bridge.set(protocol::STATE_ID, "seven").expect("set");
        bridge.set(protocol::UPDATE, "maybe").expect("set");

        assert_eq!(
            bridge.state_id(),
            Err(RegisterError::Protocol(ProtocolError::Malformed(
                ProtocolField::StateId
            )))
        );
        assert_eq!(
            bridge.update_flag(),
            Err(RegisterError::Protocol(ProtocolError::Malformed(
                ProtocolField::UpdateFlag
            )))
        );
    }

    #[test]
    fn missing_sample_is_reported() {
        let mut bridge = MemoryBridge::<8>::new();
        assert_eq!(
            bridge.sample_value(protocol::DEFAULT_SAMPLE_KEY),
            Err(RegisterError::Protocol(ProtocolError::Missing(
                ProtocolField::SampleValue
            )))
        );

        bridge.set(protocol::DEFAULT_SAMPLE_KEY, "3.5").expect("set");
        assert_eq!(bridge.sample_value(protocol::DEFAULT_SAMPLE_KEY), Ok(3.5));
    }

    #[test]
    fn table_reports_capacity_errors() {
        let mut bridge = MemoryBridge::<1>::new();
        bridge.set("A", "1").expect("first key");
        bridge.set("A", "2").expect("overwrite");
        assert_eq!(bridge.set("B", "1"), Err(MemoryBridgeError::Full));
        let oversized = [b'x'; MAX_VALUE_LEN + 1];
        let oversized = core::str::from_utf8(&oversized).expect("ascii");
        assert_eq!(
            bridge.set("A", oversized),
            Err(MemoryBridgeError::ValueTooLong)
        );
        assert!(bridge.remove("A"));
        assert!(!bridge.remove("A"));
    }
}
