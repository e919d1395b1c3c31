//! Model-View-Update execution engine for terminal user interfaces.
//!
//! An application supplies a [`Model`](runtime::Model) — `init`, `update`,
//! `view` — and hands it to a [`Runtime`](runtime::Runtime). The runtime
//! owns the render/poll/update/dispatch loop; `update` stays synchronous and
//! pure, describing side effects as [`Command`](command::Command) values the
//! runtime dispatches on its behalf.

pub mod cancellation;
pub mod command;
pub(crate) mod dispatch;
pub mod error;
pub mod outlet;

#[cfg(feature = "crossterm")]
pub mod compose;
#[cfg(feature = "crossterm")]
pub mod crossterm_events;
#[cfg(feature = "crossterm")]
pub mod event;
#[cfg(feature = "crossterm")]
pub mod runtime;

pub use cancellation::Token;
pub use command::{Command, Grace, Handle, SystemOutcome};
pub use error::{Error, Result};
pub use outlet::{Outlet, Sink};

#[cfg(feature = "crossterm")]
pub use compose::{delegate, route, KeyRule, Prefix, Router, RouterBuilder};
#[cfg(feature = "crossterm")]
pub use crossterm_events::CrosstermEvents;
#[cfg(feature = "crossterm")]
pub use event::{EventSource, Synthetic, TermEvent};
#[cfg(feature = "crossterm")]
pub use runtime::{Model, Runtime, RuntimeOptions, UpdateResult};
