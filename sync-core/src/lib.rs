#![no_std]

// Shared logic for the bridge state synchronization daemon.
//
// This crate keeps the transition protocol and the supervisor state machine free
// of the Rust standard library. Host adapters supply the bridge transport, the
// durable store, the telemetry archive, and a monotonic clock.

pub mod bridge;
pub mod clock;
pub mod context;
pub mod fault;
pub mod health;
pub mod protocol;
pub mod store;
pub mod supervisor;
pub mod telemetry;
pub mod transition;

pub use context::Context;
pub use fault::{ContextFault, Fault};
pub use supervisor::{Step, Supervisor, SupervisorConfig, SupervisorEvent, SupervisorState};
