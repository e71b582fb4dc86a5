//! Unclassified failures.
//!
//! Expected outcomes (no-op transitions, acknowledgment timeouts, a device that
//! is not ready yet) are result variants of the operations that produce them.
//! Everything else lands here and sends the supervisor through its degraded
//! path.

use core::fmt;

use crate::bridge::{BridgeLink, RegisterError};
use crate::protocol::ProtocolError;
use crate::store::StateStore;
use crate::telemetry::TelemetryArchive;

/// Unexpected failure raised by one of the collaborators.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Fault<B, S, A> {
    /// Bridge transport failed.
    Bridge(B),
    /// Durable store failed.
    Store(S),
    /// Telemetry archive rejected a sample.
    Archive(A),
    /// Bridge returned a value outside the key grammar.
    Protocol(ProtocolError),
    /// History holds no record to re-assert at startup.
    MissingHistory,
}

/// [`Fault`] specialised to the error types of a context's collaborators.
pub type ContextFault<L, S, A> = Fault<
    <L as BridgeLink>::Error,
    <S as StateStore>::Error,
    <A as TelemetryArchive>::Error,
>;

impl<B, S, A> Fault<B, S, A> {
    /// Short label used when reporting the fault.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Bridge(_) => "bridge",
            Self::Store(_) => "store",
            Self::Archive(_) => "archive",
            Self::Protocol(_) => "protocol",
            Self::MissingHistory => "history",
        }
    }
}

impl<B, S, A> From<RegisterError<B>> for Fault<B, S, A> {
    fn from(err: RegisterError<B>) -> Self {
        match err {
            RegisterError::Link(err) => Self::Bridge(err),
            RegisterError::Protocol(err) => Self::Protocol(err),
        }
    }
}

impl<B, S, A> From<ProtocolError> for Fault<B, S, A> {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

impl<B, S, A> fmt::Display for Fault<B, S, A>
where
    B: fmt::Display,
    S: fmt::Display,
    A: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bridge(err) => write!(f, "bridge failure: {err}"),
            Self::Store(err) => write!(f, "state store failure: {err}"),
            Self::Archive(err) => write!(f, "telemetry archive failure: {err}"),
            Self::Protocol(err) => write!(f, "protocol violation: {err}"),
            Self::MissingHistory => f.write_str("state history is empty"),
        }
    }
}
