//! TCP JSON client for the Yun bridge mailbox.
//!
//! Each request opens a fresh connection, writes one JSON object, and reads one
//! JSON object back. `get` sends `{"command":"get","key":K}` and expects
//! `{"value":V}`; a missing or null value means the key was never set. `put`
//! sends `{"command":"put","key":K,"value":V}` and waits for the echo.

use std::io::{self, BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sync_core::bridge::{BridgeLink, BridgeValue, MAX_VALUE_LEN};
use thiserror::Error;
use tracing::trace;

/// Bridge transport errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge address {address:?} did not resolve")]
    Resolve { address: String },
    #[error("bridge connect to {address} failed: {source}")]
    Connect {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("bridge i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("bridge message malformed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bridge closed the connection without a response")]
    NoResponse,
    #[error("bridge value for {key} exceeds {max} bytes", max = MAX_VALUE_LEN)]
    ValueTooLong { key: String },
}

#[derive(Debug, Serialize)]
#[serde(tag = "command", rename_all = "lowercase")]
enum Request<'a> {
    Get { key: &'a str },
    Put { key: &'a str, value: &'a str },
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    value: Option<Value>,
}

impl Response {
    fn into_text(self) -> Option<String> {
        match self.value? {
            Value::Null => None,
            Value::String(text) => Some(text),
            other => Some(other.to_string()),
        }
    }
}

/// Bridge client speaking the Yun JSON protocol over TCP.
#[derive(Clone, Debug)]
pub struct TcpJsonBridge {
    address: SocketAddr,
    timeout: Duration,
}

impl TcpJsonBridge {
    #[must_use]
    pub const fn new(address: SocketAddr, timeout: Duration) -> Self {
        Self { address, timeout }
    }

    /// Resolves `address` (`host:port`) and uses the first result.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Resolve`] when the name has no addresses.
    pub fn resolve(address: &str, timeout: Duration) -> Result<Self, BridgeError> {
        let resolved = address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| BridgeError::Resolve {
                address: address.to_owned(),
            })?;
        Ok(Self::new(resolved, timeout))
    }

    #[must_use]
    pub const fn address(&self) -> SocketAddr {
        self.address
    }

    fn exchange(&self, request: &Request<'_>) -> Result<Response, BridgeError> {
        let stream = TcpStream::connect_timeout(&self.address, self.timeout).map_err(|source| {
            BridgeError::Connect {
                address: self.address,
                source,
            }
        })?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.set_nodelay(true)?;

        let mut writer = &stream;
        serde_json::to_writer(&mut writer, request)?;
        writer.flush()?;
        trace!(?request, "bridge request sent");

        let reader = BufReader::new(&stream);
        let response = serde_json::Deserializer::from_reader(reader)
            .into_iter::<Response>()
            .next()
            .ok_or(BridgeError::NoResponse)??;
        Ok(response)
    }
}

impl BridgeLink for TcpJsonBridge {
    type Error = BridgeError;

    fn get(&mut self, key: &str) -> Result<Option<BridgeValue>, Self::Error> {
        let Some(text) = self.exchange(&Request::Get { key })?.into_text() else {
            return Ok(None);
        };
        BridgeValue::try_from(text.as_str())
            .map(Some)
            .map_err(|_| BridgeError::ValueTooLong {
                key: key.to_owned(),
            })
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), Self::Error> {
        self.exchange(&Request::Put { key, value })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_use_bridge_command_shape() {
        let get = serde_json::to_string(&Request::Get { key: "STATE_ID" }).expect("json");
        assert_eq!(get, r#"{"command":"get","key":"STATE_ID"}"#);

        let put = serde_json::to_string(&Request::Put {
            key: "UPDATE",
            value: "True",
        })
        .expect("json");
        assert_eq!(put, r#"{"command":"put","key":"UPDATE","value":"True"}"#);
    }

    #[test]
    fn response_values_normalize_to_text() {
        let parse = |raw: &str| {
            serde_json::from_str::<Response>(raw)
                .expect("json")
                .into_text()
        };
        assert_eq!(parse(r#"{"value":"RUNNING"}"#), Some("RUNNING".to_owned()));
        assert_eq!(parse(r#"{"value":42}"#), Some("42".to_owned()));
        assert_eq!(parse(r#"{"value":null}"#), None);
        assert_eq!(parse(r#"{"key":"X"}"#), None);
    }
}
