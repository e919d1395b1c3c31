use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::cancellation::Token;
use crate::dispatch::DispatchCtx;
use crate::outlet::{Outlet, Sink};

/// The closed sum of every side effect a `Model::update` can request.
///
/// `Command<Msg>` is immutable once built. `Mapped` is the only variant whose
/// inner value can carry a *different* message type: it is type-erased
/// behind [`ErasedCommand`] so that `Command<Msg>` itself stays a plain,
/// non-generic-over-the-inner-type enum.
pub enum Command<Msg> {
    /// Terminate the runtime loop. Never reaches the dispatcher — the loop
    /// short-circuits on it before calling `dispatch`.
    Exit,
    System(SystemCommand<Msg>),
    Mapped(Box<dyn ErasedCommand<Msg>>),
    Custom(CustomCommand<Msg>),
    /// Request cancellation of the `Custom` identified by this handle.
    Cancel(Handle),
}

impl<Msg> std::fmt::Debug for Command<Msg> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exit => write!(f, "Exit"),
            Self::System(cmd) => f
                .debug_struct("System")
                .field("command_line", &cmd.command_line)
                .field("stream", &cmd.stream)
                .finish(),
            Self::Mapped(_) => write!(f, "Mapped(..)"),
            Self::Custom(cmd) => f.debug_struct("Custom").field("handle", &cmd.handle).finish(),
            Self::Cancel(handle) => f.debug_tuple("Cancel").field(handle).finish(),
        }
    }
}

impl<Msg: Send + 'static> Command<Msg> {
    /// Terminates the runtime loop.
    pub fn exit() -> Self {
        Command::Exit
    }

    /// Runs `command_line` to completion via the host shell and delivers a
    /// single message built from [`SystemOutcome::Finished`] (or
    /// [`SystemOutcome::Error`] if the process could not be spawned).
    pub fn system(
        command_line: impl Into<String>,
        to_message: impl Fn(SystemOutcome) -> Msg + Send + Sync + 'static,
    ) -> Self {
        Command::System(SystemCommand {
            command_line: command_line.into(),
            stream: false,
            to_message: Arc::new(to_message),
        })
    }

    /// Like [`Command::system`] but delivers one message per output line as
    /// it is produced, followed by exactly one [`SystemOutcome::Complete`].
    pub fn system_streaming(
        command_line: impl Into<String>,
        to_message: impl Fn(SystemOutcome) -> Msg + Send + Sync + 'static,
    ) -> Self {
        Command::System(SystemCommand {
            command_line: command_line.into(),
            stream: true,
            to_message: Arc::new(to_message),
        })
    }

    /// Dispatches `inner` and transforms every message it produces through
    /// `mapper` before delivery. Composes: mapping an already-`Mapped`
    /// command yields function composition, because dispatching simply
    /// nests one mapping sink inside another.
    pub fn map<A: Send + 'static>(
        inner: Command<A>,
        mapper: impl Fn(A) -> Msg + Send + Sync + 'static,
    ) -> Self {
        Command::Mapped(Box::new(MapNode {
            inner,
            mapper: Arc::new(mapper),
        }))
    }

    /// Runs `callable` on a worker task with a fresh [`Outlet`] and
    /// [`Token`], using the default grace period (2 seconds). Returns a
    /// command with a fresh [`Handle`] even if `callable` is reused across
    /// calls.
    pub fn custom<F>(callable: F) -> Self
    where
        F: Fn(Outlet<Msg>, Token) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self::custom_with_grace(callable, Grace::default())
    }

    /// Like [`Command::custom`] but with an explicit grace period.
    pub fn custom_with_grace<F>(callable: F, grace: Grace) -> Self
    where
        F: Fn(Outlet<Msg>, Token) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Command::Custom(CustomCommand {
            handle: Handle::fresh(),
            grace,
            callable: Arc::new(callable),
        })
    }

    /// Requests cancellation of the `Custom` identified by `handle`.
    pub fn cancel(handle: Handle) -> Self {
        Command::Cancel(handle)
    }

    /// The handle of this command, if it is a `Custom`.
    pub fn handle(&self) -> Option<Handle> {
        match self {
            Command::Custom(cmd) => Some(cmd.handle),
            _ => None,
        }
    }
}

pub struct SystemCommand<Msg> {
    pub(crate) command_line: String,
    pub(crate) stream: bool,
    pub(crate) to_message: Arc<dyn Fn(SystemOutcome) -> Msg + Send + Sync>,
}

pub struct CustomCommand<Msg> {
    pub(crate) handle: Handle,
    pub(crate) grace: Grace,
    pub(crate) callable: Arc<dyn Fn(Outlet<Msg>, Token) -> BoxFuture<'static, ()> + Send + Sync>,
}

/// The result payload of a `System` command, delivered through the
/// `to_message` constructor supplied to [`Command::system`] /
/// [`Command::system_streaming`]. This enum is the typed stand-in for the
/// dynamic original's `(tag, kind, payload)` tuples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemOutcome {
    /// Batch-mode result: the process ran to completion.
    Finished {
        stdout: String,
        stderr: String,
        status: i32,
    },
    /// Streaming-mode: one stdout line, newline included.
    Stdout(String),
    /// Streaming-mode: one stderr line, newline included.
    Stderr(String),
    /// Streaming-mode: the process exited; always the last message for its
    /// command, delivered after every preceding `Stdout`/`Stderr`.
    Complete(i32),
    /// The process could not be spawned, in either mode.
    Error(String),
}

/// How long [`Cancel`](Command::Cancel) waits for a `Custom` worker to stop
/// cooperatively before it is aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grace {
    After(Duration),
    /// Wait indefinitely; never force-terminate.
    Forever,
}

impl Default for Grace {
    fn default() -> Self {
        Grace::After(Duration::from_secs_f64(2.0))
    }
}

/// The unique identity of a dispatched `Custom` command. Two `Handle`s
/// compare equal only if they came from the same `Command::custom(...)`
/// call — wrapping the same callable twice yields distinct handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Handle(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Object-safe dispatch hook for a type-erased `Mapped` command. Implemented
/// only by [`MapNode`]; never implemented outside this crate.
pub(crate) trait ErasedCommand<Msg>: Send {
    fn dispatch(
        self: Box<Self>,
        sink: Arc<dyn Sink<Msg>>,
        ctx: DispatchCtx,
    ) -> BoxFuture<'static, Option<tokio::task::JoinHandle<()>>>;
}

struct MapNode<A, Msg> {
    inner: Command<A>,
    mapper: Arc<dyn Fn(A) -> Msg + Send + Sync>,
}

impl<A, Msg> ErasedCommand<Msg> for MapNode<A, Msg>
where
    A: Send + 'static,
    Msg: Send + 'static,
{
    fn dispatch(
        self: Box<Self>,
        sink: Arc<dyn Sink<Msg>>,
        ctx: DispatchCtx,
    ) -> BoxFuture<'static, Option<tokio::task::JoinHandle<()>>> {
        let mapped_sink: Arc<dyn Sink<A>> = Arc::new(MappedSink {
            inner: sink,
            mapper: self.mapper,
        });
        Box::pin(crate::dispatch::dispatch(self.inner, mapped_sink, ctx))
    }
}

/// Wraps an outer `Sink<Msg>` as a `Sink<A>` by applying a mapper at send
/// time. Nesting two of these (a `Mapped` of a `Mapped`) is exactly function
/// composition, with no special-casing required anywhere in the dispatcher.
struct MappedSink<A, Msg> {
    inner: Arc<dyn Sink<Msg>>,
    mapper: Arc<dyn Fn(A) -> Msg + Send + Sync>,
}

impl<A, Msg: Send + 'static> Sink<A> for MappedSink<A, Msg> {
    fn send(&self, message: A) {
        self.inner.send((self.mapper)(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_handles_are_never_equal_even_for_the_same_callable() {
        let callable: fn(Outlet<()>, Token) -> BoxFuture<'static, ()> = |_, _| Box::pin(async {});
        let a: Command<()> = Command::custom(callable);
        let b: Command<()> = Command::custom(callable);
        assert_ne!(a.handle(), b.handle());
    }

    #[test]
    fn cancel_and_custom_handle_round_trip() {
        let cmd: Command<()> = Command::custom(|_, _| Box::pin(async {}));
        let handle = cmd.handle().unwrap();
        let cancel = Command::<()>::cancel(handle);
        assert_eq!(cancel.handle(), None);
        match cancel {
            Command::Cancel(h) => assert_eq!(h, handle),
            _ => panic!("expected Cancel"),
        }
    }
}
