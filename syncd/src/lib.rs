//! Host adapters and process wiring for the bridge state synchronization daemon.
//!
//! `sync-core` holds the portable protocol and state machine; this crate binds
//! it to a TCP JSON bridge, an `SQLite` state store, an `rrdtool` archive, and
//! the system clock, and adds configuration, logging, and the CLI.

pub mod archive;
pub mod bridge;
pub mod clock;
pub mod config;
pub mod logging;
pub mod runtime;
pub mod store;
