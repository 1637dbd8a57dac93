//! Error types for the hsm-rt runtime.

use crate::tree::StateId;

/// Errors surfaced by registration, send, and lifecycle operations.
///
/// Registration problems are reported synchronously to the caller; a
/// stopped machine rejects sends instead of panicking. Nothing in this
/// crate terminates the process — the worst outcome is a stopped or
/// no-op machine instance.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The state id was never issued by this machine, or the node was
    /// removed before the tree was sealed.
    #[error("state {0} is not registered with this machine")]
    UnknownState(StateId),
    /// A state name was re-registered under a different parent.
    #[error("state `{name}` is already registered under a different parent")]
    ParentConflict {
        /// Name of the conflicting state.
        name: String,
    },
    /// Registration is closed once the worker thread owns the tree.
    #[error("machine already started; registration is closed")]
    AlreadyStarted,
    /// `start` was called before `set_initial_state`.
    #[error("no initial state set")]
    NoInitialState,
    /// Negative message names are reserved for the runtime.
    #[error("message name {0} is reserved for internal use")]
    ReservedName(i32),
    /// The queue has been stopped; the message was reclaimed, not enqueued.
    #[error("message queue is stopped")]
    Stopped,
    /// The worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}
