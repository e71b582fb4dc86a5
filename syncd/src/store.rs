//! `SQLite`-backed state history and update queue.
//!
//! ## Schema
//! - `state (Posted INTEGER, StateID INTEGER)`: applied states, newest is current.
//! - `update_queue (Posted INTEGER, StateID INTEGER)`: pending requests.
//!
//! Opening the store creates both tables when missing and seeds the history
//! with the initial state so startup always has a row to re-assert. Every
//! commit runs inside a `BEGIN IMMEDIATE` transaction so a concurrent writer
//! (the request CLI) never observes a half-applied transition.

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, OptionalExtension, TransactionBehavior, params};
use sync_core::protocol::Timestamp;
use sync_core::store::{PendingTransition, StateRecord, StateStore, TransitionCommit};
use thiserror::Error;
use tracing::{debug, info};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS state (Posted INTEGER, StateID INTEGER);
    CREATE TABLE IF NOT EXISTS update_queue (Posted INTEGER, StateID INTEGER);
";

const LATEST_STATE: &str =
    "SELECT Posted, StateID FROM state ORDER BY Posted DESC, rowid DESC LIMIT 1";
const LATEST_PENDING: &str =
    "SELECT Posted, StateID FROM update_queue ORDER BY Posted DESC, rowid DESC LIMIT 1";

/// `SQLite` store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    #[error("state store database error: {0}")]
    Db(#[from] rusqlite::Error),
}

/// Durable [`StateStore`] over a single `SQLite` file.
#[derive(Debug)]
pub struct SqliteStateStore {
    connection: Connection,
}

impl SqliteStateStore {
    /// Opens (creating if needed) the database at `path`.
    ///
    /// When the history table is empty a sentinel row posted at `now` is
    /// inserted.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the file cannot be opened or provisioned.
    pub fn open(
        path: &Path,
        busy_timeout: Duration,
        now: Timestamp,
    ) -> Result<Self, SqliteStoreError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let connection = Connection::open_with_flags(path, flags)?;
        connection.busy_timeout(busy_timeout)?;

        let mut store = Self { connection };
        if store.provision(now)? {
            info!(path = %path.display(), posted_at = now, "seeded state history");
        }
        Ok(store)
    }

    /// Creates missing tables and seeds history; returns whether a seed row was added.
    fn provision(&mut self, now: Timestamp) -> Result<bool, SqliteStoreError> {
        let tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(SCHEMA)?;

        let existing: Option<i64> = tx
            .query_row("SELECT Posted FROM state LIMIT 1", [], |row| row.get(0))
            .optional()?;
        let seeded = existing.is_none();
        if seeded {
            let sentinel = StateRecord::sentinel(now);
            tx.execute(
                "INSERT INTO state (Posted, StateID) VALUES (?1, ?2)",
                params![sentinel.posted_at, sentinel.state_id],
            )?;
        }
        tx.commit()?;
        Ok(seeded)
    }

    /// Adds a pending transition to the queue.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the insert fails.
    pub fn enqueue(&mut self, request: PendingTransition) -> Result<(), SqliteStoreError> {
        self.connection.execute(
            "INSERT INTO update_queue (Posted, StateID) VALUES (?1, ?2)",
            params![request.posted_at, request.state_id],
        )?;
        debug!(
            posted_at = request.posted_at,
            state_id = request.state_id,
            "queued state request"
        );
        Ok(())
    }

    /// Returns every history row, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails.
    pub fn history(&self) -> Result<Vec<StateRecord>, SqliteStoreError> {
        self.rows("SELECT Posted, StateID FROM state ORDER BY Posted ASC, rowid ASC")
    }

    /// Returns every pending transition, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails.
    pub fn pending(&self) -> Result<Vec<PendingTransition>, SqliteStoreError> {
        self.rows("SELECT Posted, StateID FROM update_queue ORDER BY Posted ASC, rowid ASC")
    }

    fn rows(&self, sql: &str) -> Result<Vec<StateRecord>, SqliteStoreError> {
        let mut statement = self.connection.prepare(sql)?;
        let rows = statement
            .query_map([], |row| Ok(StateRecord::new(row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn newest(connection: &Connection, sql: &str) -> Result<Option<StateRecord>, rusqlite::Error> {
    connection
        .query_row(sql, [], |row| Ok(StateRecord::new(row.get(0)?, row.get(1)?)))
        .optional()
}

impl StateStore for SqliteStateStore {
    type Error = SqliteStoreError;

    fn latest_state(&mut self) -> Result<Option<StateRecord>, Self::Error> {
        Ok(newest(&self.connection, LATEST_STATE)?)
    }

    fn latest_pending(&mut self) -> Result<Option<PendingTransition>, Self::Error> {
        Ok(newest(&self.connection, LATEST_PENDING)?)
    }

    fn commit(&mut self, commit: &TransitionCommit) -> Result<(), Self::Error> {
        let posted = commit.applied.posted_at;
        let tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        if commit.appends_history(newest(&tx, LATEST_STATE)?) {
            tx.execute(
                "INSERT INTO state (Posted, StateID) VALUES (?1, ?2)",
                params![posted, commit.applied.state_id],
            )?;
        }
        if commit.prunes_history() {
            tx.execute("DELETE FROM state WHERE Posted < ?1", params![posted])?;
        }
        if commit.prunes_queue() {
            tx.execute("DELETE FROM update_queue WHERE Posted <= ?1", params![posted])?;
        }

        tx.commit()?;
        Ok(())
    }
}
