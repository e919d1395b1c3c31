use std::sync::Arc;
use std::time::Duration;

use ratatui::backend::Backend;
use ratatui::Terminal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::command::Command;
use crate::dispatch::{dispatch, DispatchCtx};
use crate::error::{Error, Result};
use crate::event::{EventSource, Synthetic, TermEvent};
use crate::outlet::{Outlet, Sink};

/// A cohesive `{Model, init, update, view}` bag. The model is replaced, not
/// mutated, by every `update` call: `update` takes `&self` and returns a
/// brand new value (or asks to keep the old one, via [`UpdateResult`]),
/// matching the deep-immutability the dynamic original enforced at runtime.
/// `Clone` is expected to be cheap — the common case is a model most of
/// whose fields are unchanged between iterations.
pub trait Model: Clone + Send + 'static {
    /// The application-defined message type. Terminal input events are
    /// converted into it via `From<TermEvent>` so they can flow through the
    /// same `update` entry point as every other message.
    type Message: Send + 'static + From<TermEvent>;

    /// Returns the message to seed the loop with, invoked once before the
    /// first render. The default produces no initial message.
    fn init(&self) -> Option<Self::Message> {
        None
    }

    fn update(&self, message: Self::Message) -> UpdateResult<Self, Self::Message>;

    fn view(&self, frame: &mut ratatui::Frame<'_>);
}

/// The normalized return shape of [`Model::update`].
///
/// The dynamic original accepted three ad hoc return shapes and normalized
/// them at runtime (a two-element sequence, a bare command, or a bare
/// model). Here the three shapes are distinct enum variants instead of
/// inspected at runtime, which sidesteps the original's "does this
/// two-element model look like a command tuple?" ambiguity entirely: an
/// application model that happens to be a 2-tuple can never be mistaken for
/// `Full`, since `Full` is never constructed by pattern-matching the model's
/// own shape.
pub enum UpdateResult<M, Msg> {
    /// Both the new model and the command (if any) are given explicitly.
    Full(M, Option<Command<Msg>>),
    /// No new model — the loop reuses a clone of the model it already held.
    CommandOnly(Option<Command<Msg>>),
    /// A new model and no command.
    ModelOnly(M),
}

impl<M: Clone, Msg> UpdateResult<M, Msg> {
    pub fn full(model: M, command: impl Into<Option<Command<Msg>>>) -> Self {
        Self::Full(model, command.into())
    }

    pub fn command(command: Command<Msg>) -> Self {
        Self::CommandOnly(Some(command))
    }

    /// No model change, no command — a pure no-op.
    pub fn none() -> Self {
        Self::CommandOnly(None)
    }

    pub fn model(model: M) -> Self {
        Self::ModelOnly(model)
    }

    pub(crate) fn normalize(self, previous: &M) -> (M, Option<Command<Msg>>) {
        match self {
            Self::Full(model, command) => (model, command),
            Self::CommandOnly(command) => (previous.clone(), command),
            Self::ModelOnly(model) => (model, None),
        }
    }
}

impl<M, Msg> From<(M, Option<Command<Msg>>)> for UpdateResult<M, Msg> {
    fn from((model, command): (M, Option<Command<Msg>>)) -> Self {
        Self::Full(model, command)
    }
}

impl<M, Msg> From<(M, Command<Msg>)> for UpdateResult<M, Msg> {
    fn from((model, command): (M, Command<Msg>)) -> Self {
        Self::Full(model, Some(command))
    }
}

impl<M, Msg> From<Command<Msg>> for UpdateResult<M, Msg> {
    fn from(command: Command<Msg>) -> Self {
        Self::CommandOnly(Some(command))
    }
}

#[cfg(test)]
mod update_result_tests {
    use super::*;

    #[derive(Clone, PartialEq, Eq, Debug)]
    struct M(i32);

    #[test]
    fn command_only_preserves_the_previous_model() {
        let previous = M(7);
        let (model, command) = UpdateResult::<M, ()>::command(Command::exit()).normalize(&previous);
        assert_eq!(model, previous);
        assert!(matches!(command, Some(Command::Exit)));
    }

    #[test]
    fn model_only_replaces_the_model_and_carries_no_command() {
        let previous = M(7);
        let (model, command) = UpdateResult::<M, ()>::model(M(8)).normalize(&previous);
        assert_eq!(model, M(8));
        assert!(command.is_none());
    }

    #[test]
    fn full_supplies_both_explicitly() {
        let previous = M(7);
        let (model, command) = UpdateResult::full(M(9), Command::<()>::exit()).normalize(&previous);
        assert_eq!(model, M(9));
        assert!(matches!(command, Some(Command::Exit)));
    }

    #[test]
    fn none_is_a_pure_no_op() {
        let previous = M(7);
        let (model, command) = UpdateResult::<M, ()>::none().normalize(&previous);
        assert_eq!(model, previous);
        assert!(command.is_none());
    }
}

/// Controls the two runtime-owned timing knobs: the per-frame poll deadline
/// and the shutdown grace window. Every other timeout (a `Custom`'s own
/// `grace`) is configured on the command itself.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// How long to wait for one input event before rendering again anyway.
    /// Defaults to ~16ms, a ~60Hz redraw budget.
    pub poll_interval: Duration,
    /// How long `Exit` waits for every outstanding `Custom` to stop
    /// cooperatively before aborting the survivors.
    pub shutdown_grace: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(16),
            shutdown_grace: Duration::from_millis(100),
        }
    }
}

impl RuntimeOptions {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_shutdown_grace(mut self, shutdown_grace: Duration) -> Self {
        self.shutdown_grace = shutdown_grace;
        self
    }
}

/// Drives the render/poll/update/dispatch/drain loop described in the
/// runtime specification. One `Runtime` owns one active-command table and
/// one synthetic-event channel for its entire lifetime.
pub struct Runtime {
    ctx: DispatchCtx,
    options: RuntimeOptions,
    synthetic_tx: mpsc::UnboundedSender<Synthetic>,
    synthetic_rx: mpsc::UnboundedReceiver<Synthetic>,
}

impl Runtime {
    pub fn new(options: RuntimeOptions) -> Self {
        let (synthetic_tx, synthetic_rx) = mpsc::unbounded_channel();
        Self {
            ctx: DispatchCtx::new(),
            options,
            synthetic_tx,
            synthetic_rx,
        }
    }

    /// A sender that can push [`Synthetic`] events (notably `Sync`) into the
    /// loop from outside. The test harness uses this to make an otherwise
    /// asynchronous scenario deterministic.
    pub fn synthetic_sender(&self) -> mpsc::UnboundedSender<Synthetic> {
        self.synthetic_tx.clone()
    }

    /// Runs the loop to completion: renders, polls `events` for input,
    /// feeds `update`, dispatches any returned command, and drains the
    /// inbox, until an `Exit` command is observed. Returns the final model.
    pub async fn run<M, B>(
        mut self,
        mut model: M,
        terminal: &mut Terminal<B>,
        events: &mut dyn EventSource,
    ) -> Result<M>
    where
        M: Model,
        B: Backend,
    {
        let (tx, mut inbox) = mpsc::unbounded_channel::<M::Message>();
        let sink: Arc<dyn Sink<M::Message>> = Arc::new(Outlet::new(tx));
        let mut pending: Vec<JoinHandle<()>> = Vec::new();

        if let Some(init_message) = model.init() {
            let (next_model, exit) = self.step(&model, init_message, &sink, &mut pending).await;
            model = next_model;
            if exit {
                return self.shutdown(model, pending).await;
            }
        }

        'main: loop {
            terminal.draw(|frame| model.view(frame)).map_err(Error::Io)?;

            if let Some(term_event) = events.poll(self.options.poll_interval).await? {
                let (next_model, exit) = self
                    .step(&model, M::Message::from(term_event), &sink, &mut pending)
                    .await;
                model = next_model;
                if exit {
                    break 'main;
                }
            }

            while let Ok(synthetic) = self.synthetic_rx.try_recv() {
                match synthetic {
                    Synthetic::Sync => {
                        for worker in pending.drain(..) {
                            let _ = worker.await;
                        }
                        while let Ok(message) = inbox.try_recv() {
                            let (next_model, exit) = self.step(&model, message, &sink, &mut pending).await;
                            model = next_model;
                            if exit {
                                break 'main;
                            }
                        }
                    }
                }
            }

            while let Ok(message) = inbox.try_recv() {
                let (next_model, exit) = self.step(&model, message, &sink, &mut pending).await;
                model = next_model;
                if exit {
                    break 'main;
                }
            }
        }

        self.shutdown(model, pending).await
    }

    async fn step<M: Model>(
        &self,
        model: &M,
        message: M::Message,
        sink: &Arc<dyn Sink<M::Message>>,
        pending: &mut Vec<JoinHandle<()>>,
    ) -> (M, bool) {
        let (next_model, command) = model.update(message).normalize(model);
        match command {
            Some(Command::Exit) => (next_model, true),
            Some(command) => {
                if let Some(worker) = dispatch(command, sink.clone(), self.ctx.clone()).await {
                    pending.push(worker);
                }
                (next_model, false)
            }
            None => (next_model, false),
        }
    }

    async fn shutdown<M>(self, model: M, pending: Vec<JoinHandle<()>>) -> Result<M> {
        self.ctx.active.shutdown(self.options.shutdown_grace).await;
        for worker in pending {
            worker.abort();
        }
        Ok(model)
    }
}
