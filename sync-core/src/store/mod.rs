//! Durable state history and pending-transition queue.
//!
//! Both tables hold `(posted_at, state_id)` rows. History is append-only with
//! the newest row being the current state; the queue holds requests placed by
//! outside callers. The transition engine never touches rows directly. It hands
//! the store a [`TransitionCommit`] and the store applies the insert and both
//! prunes as one atomic unit.

use core::fmt;

use heapless::Vec;

use crate::protocol::{INITIAL_STATE_ID, StateId, Timestamp};

/// Applied (history) or requested (queue) device state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StateRecord {
    pub posted_at: Timestamp,
    pub state_id: StateId,
}

/// Queue rows share the history row shape.
pub type PendingTransition = StateRecord;

impl StateRecord {
    #[must_use]
    pub const fn new(posted_at: Timestamp, state_id: StateId) -> Self {
        Self {
            posted_at,
            state_id,
        }
    }

    /// History row seeded before any real transition has happened.
    #[must_use]
    pub const fn sentinel(posted_at: Timestamp) -> Self {
        Self::new(posted_at, INITIAL_STATE_ID)
    }
}

/// Where the transition being applied came from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransitionSource {
    /// Re-assertion of the newest history row during (re)synchronization.
    InitialState,
    /// Newest request in the pending queue.
    UpdateQueue,
}

impl fmt::Display for TransitionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InitialState => "initial-state",
            Self::UpdateQueue => "update-queue",
        })
    }
}

/// Store mutation that follows an acknowledged transition.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TransitionCommit {
    pub applied: StateRecord,
    pub source: TransitionSource,
    /// Append `applied` to history unless a row at or after its timestamp exists.
    pub record_history: bool,
}

impl TransitionCommit {
    /// Whether history rows strictly older than `applied` are deleted.
    #[must_use]
    pub const fn prunes_history(&self) -> bool {
        self.record_history || matches!(self.source, TransitionSource::InitialState)
    }

    /// Whether queue rows at or before `applied` are deleted.
    #[must_use]
    pub const fn prunes_queue(&self) -> bool {
        matches!(self.source, TransitionSource::UpdateQueue)
    }

    /// Decides whether `applied` becomes a new history row given the current one.
    ///
    /// History timestamps strictly increase, so re-asserting the current row
    /// never duplicates it.
    #[must_use]
    pub fn appends_history(&self, current: Option<StateRecord>) -> bool {
        self.record_history
            && current.is_none_or(|current| self.applied.posted_at > current.posted_at)
    }
}

/// Durable storage for history and pending transitions.
pub trait StateStore {
    /// Storage failure type.
    type Error;

    /// Returns the newest history row.
    ///
    /// # Errors
    ///
    /// Returns the storage error when the query fails.
    fn latest_state(&mut self) -> Result<Option<StateRecord>, Self::Error>;

    /// Returns the newest pending transition.
    ///
    /// # Errors
    ///
    /// Returns the storage error when the query fails.
    fn latest_pending(&mut self) -> Result<Option<PendingTransition>, Self::Error>;

    /// Applies the insert and prunes described by `commit` atomically.
    ///
    /// # Errors
    ///
    /// Returns the storage error; no row changes when it does.
    fn commit(&mut self, commit: &TransitionCommit) -> Result<(), Self::Error>;
}

impl<S> StateStore for &mut S
where
    S: StateStore + ?Sized,
{
    type Error = S::Error;

    fn latest_state(&mut self) -> Result<Option<StateRecord>, Self::Error> {
        (**self).latest_state()
    }

    fn latest_pending(&mut self) -> Result<Option<PendingTransition>, Self::Error> {
        (**self).latest_pending()
    }

    fn commit(&mut self, commit: &TransitionCommit) -> Result<(), Self::Error> {
        (**self).commit(commit)
    }
}

/// Capacity failure of [`MemoryStateStore`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MemoryStoreError {
    HistoryFull,
    QueueFull,
}

impl fmt::Display for MemoryStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::HistoryFull => "history table full",
            Self::QueueFull => "update queue full",
        })
    }
}

/// Fixed-capacity store holding up to `N` rows per table.
#[derive(Clone, Debug, Default)]
pub struct MemoryStateStore<const N: usize> {
    history: Vec<StateRecord, N>,
    queue: Vec<PendingTransition, N>,
}

impl<const N: usize> MemoryStateStore<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            history: Vec::new(),
            queue: Vec::new(),
        }
    }

    /// Appends a history row directly, bypassing the transition engine.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryStoreError::HistoryFull`] at capacity.
    pub fn record(&mut self, record: StateRecord) -> Result<(), MemoryStoreError> {
        self.history
            .push(record)
            .map_err(|_| MemoryStoreError::HistoryFull)
    }

    /// Queues a pending transition.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryStoreError::QueueFull`] at capacity.
    pub fn enqueue(&mut self, request: PendingTransition) -> Result<(), MemoryStoreError> {
        self.queue
            .push(request)
            .map_err(|_| MemoryStoreError::QueueFull)
    }

    /// History rows in insertion order.
    #[must_use]
    pub fn history(&self) -> &[StateRecord] {
        &self.history
    }

    /// Queue rows in insertion order.
    #[must_use]
    pub fn queue(&self) -> &[PendingTransition] {
        &self.queue
    }

    fn newest(rows: &[StateRecord]) -> Option<StateRecord> {
        rows.iter().copied().max_by_key(|row| row.posted_at)
    }
}

impl<const N: usize> StateStore for MemoryStateStore<N> {
    type Error = MemoryStoreError;

    fn latest_state(&mut self) -> Result<Option<StateRecord>, Self::Error> {
        Ok(Self::newest(&self.history))
    }

    fn latest_pending(&mut self) -> Result<Option<PendingTransition>, Self::Error> {
        Ok(Self::newest(&self.queue))
    }

    fn commit(&mut self, commit: &TransitionCommit) -> Result<(), Self::Error> {
        let posted = commit.applied.posted_at;
        let append = commit.appends_history(Self::newest(&self.history));
        if append && N == 0 {
            return Err(MemoryStoreError::HistoryFull);
        }

        // An appended row is newer than every existing one, so pruning
        // always leaves room for it.
        if commit.prunes_history() {
            self.history.retain(|row| row.posted_at >= posted);
        }
        if append {
            self.history
                .push(commit.applied)
                .map_err(|_| MemoryStoreError::HistoryFull)?;
        }
        if commit.prunes_queue() {
            self.queue.retain(|row| row.posted_at > posted);
        }
        Ok(())
    }
}
