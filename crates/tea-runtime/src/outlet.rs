use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

/// A destination a dispatched command can deliver messages to.
///
/// [`Outlet`] is the concrete implementation backed by the runtime inbox;
/// [`crate::dispatch::MappedSink`] wraps another `Sink` to apply a `Mapped`
/// command's mapper before forwarding. The dispatcher only ever talks to
/// `dyn Sink<Msg>`, so nested `Mapped` commands compose for free: wrapping a
/// `MappedSink` in another `MappedSink` is function composition.
pub trait Sink<Msg>: Send + Sync {
    fn send(&self, message: Msg);
}

impl<Msg> Sink<Msg> for Arc<dyn Sink<Msg>> {
    fn send(&self, message: Msg) {
        (**self).send(message);
    }
}

/// The capability a `Custom` callable uses to push messages into the runtime
/// inbox. Construction is private to the crate: callables only ever receive
/// one as an argument.
#[derive(Clone)]
pub struct Outlet<Msg> {
    tx: UnboundedSender<Msg>,
}

impl<Msg> Outlet<Msg> {
    pub(crate) fn new(tx: UnboundedSender<Msg>) -> Self {
        Self { tx }
    }

    /// Enqueues `message`. The inbox is unbounded, so this never blocks and
    /// never reports a queue-overflow failure; it is a no-op (but not an
    /// error) once the runtime has stopped listening.
    pub fn put(&self, message: Msg) {
        let _ = self.tx.send(message);
    }
}

impl<Msg: Send + 'static> Sink<Msg> for Outlet<Msg> {
    fn send(&self, message: Msg) {
        self.put(message);
    }
}
