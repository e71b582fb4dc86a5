//! Handles shared by every component of the daemon.

/// Bundle of the four collaborators a supervisor cycle touches.
///
/// Components borrow the bundle mutably for the duration of one operation;
/// nothing holds on to a handle between calls.
#[derive(Debug, Default)]
pub struct Context<L, S, A, C> {
    pub bridge: L,
    pub store: S,
    pub archive: A,
    pub clock: C,
}

impl<L, S, A, C> Context<L, S, A, C> {
    /// Bundles the collaborators.
    pub const fn new(bridge: L, store: S, archive: A, clock: C) -> Self {
        Self {
            bridge,
            store,
            archive,
            clock,
        }
    }
}
