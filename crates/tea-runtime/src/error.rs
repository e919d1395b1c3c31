use std::io;

use tokio::task::JoinError;

/// Errors surfaced by the runtime loop and the router builder.
///
/// Worker-internal failures never reach this type directly: a `System`
/// command reports a spawn failure as a [`crate::command::SystemOutcome::Error`]
/// message, and a `Custom` command's panics are logged via `tracing` and
/// silently drop the active-command entry (see `DESIGN.md`). Only failures
/// that cannot be handled locally by an `update` function escape `Runtime::run`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A router registration combined guards, routes, or handlers in a way
    /// that can never be satisfied (e.g. a `when` and an `unless` on the same
    /// key). Raised at `RouterBuilder::build()` time, before the loop starts.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// The terminal collaborator failed to poll or render.
    #[error("terminal I/O failure: {0}")]
    Io(#[from] io::Error),

    /// A worker task could not be joined (it panicked or was cancelled
    /// outside of the runtime's own shutdown discipline).
    #[error("worker task failed to join: {0}")]
    Join(#[from] JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;
