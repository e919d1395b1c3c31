use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command as ChildCommand;
use tokio::sync::{mpsc, Notify};
use tokio::task::{AbortHandle, JoinHandle};

use crate::cancellation::Token;
use crate::command::{Command, CustomCommand, Grace, Handle, SystemCommand, SystemOutcome};
use crate::outlet::{Outlet, Sink};

struct ActiveEntry {
    token: Token,
    abort: AbortHandle,
    done: Arc<Notify>,
    grace: Grace,
}

/// Runtime-private mapping from a `Custom` handle to its worker's
/// cancellation token, abort handle, and completion signal. Entries are
/// created on dispatch and removed on completion or cancellation; the table
/// is cleared on shutdown.
#[derive(Clone, Default)]
pub(crate) struct ActiveTable(Arc<Mutex<HashMap<Handle, ActiveEntry>>>);

impl ActiveTable {
    fn insert(&self, handle: Handle, token: Token, abort: AbortHandle, grace: Grace, done: Arc<Notify>) {
        self.0.lock().unwrap().insert(
            handle,
            ActiveEntry {
                token,
                abort,
                done,
                grace,
            },
        );
    }

    fn remove(&self, handle: Handle) -> Option<ActiveEntry> {
        self.0.lock().unwrap().remove(&handle)
    }

    pub(crate) fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    /// Signals every outstanding token, waits `grace_window` for cooperative
    /// stop, then aborts survivors. Used by `Exit` shutdown.
    pub(crate) async fn shutdown(&self, grace_window: Duration) {
        let entries: Vec<ActiveEntry> = {
            let mut table = self.0.lock().unwrap();
            table.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &entries {
            entry.token.cancel();
        }
        for entry in entries {
            if tokio::time::timeout(grace_window, entry.done.notified())
                .await
                .is_err()
            {
                tracing::warn!("worker survived shutdown grace window; aborting");
                entry.abort.abort();
            }
        }
    }
}

/// Shared, non-generic dispatch context threaded through recursive `Mapped`
/// dispatch. Not parameterized over `Msg`: the active-command table tracks
/// workers by `Handle`, independent of what message type a given `Custom`
/// happens to produce.
#[derive(Clone, Default)]
pub(crate) struct DispatchCtx {
    pub(crate) active: ActiveTable,
}

impl DispatchCtx {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

/// Translates a single command value into concurrent work, delivering
/// results to `sink`. Returns the worker task driving the command, if any
/// (`Exit` and `Cancel` never spawn one), so the runtime loop can track it
/// as a pending worker for `Sync` semantics.
pub(crate) async fn dispatch<Msg: Send + 'static>(
    command: Command<Msg>,
    sink: Arc<dyn Sink<Msg>>,
    ctx: DispatchCtx,
) -> Option<JoinHandle<()>> {
    match command {
        Command::Exit => None,
        Command::System(cmd) => Some(dispatch_system(cmd, sink)),
        Command::Mapped(node) => node.dispatch(sink, ctx).await,
        Command::Custom(cmd) => Some(dispatch_custom(cmd, sink, ctx)),
        Command::Cancel(handle) => {
            dispatch_cancel(handle, ctx).await;
            None
        }
    }
}

fn dispatch_system<Msg: Send + 'static>(cmd: SystemCommand<Msg>, sink: Arc<dyn Sink<Msg>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if cmd.stream {
            run_streaming(cmd.command_line, cmd.to_message, sink).await;
        } else {
            run_batch(cmd.command_line, cmd.to_message, sink).await;
        }
    })
}

fn shell_command(command_line: &str) -> ChildCommand {
    #[cfg(windows)]
    {
        let mut cmd = ChildCommand::new("cmd");
        cmd.arg("/C").arg(command_line);
        cmd
    }
    #[cfg(not(windows))]
    {
        let mut cmd = ChildCommand::new("sh");
        cmd.arg("-c").arg(command_line);
        cmd
    }
}

async fn run_batch<Msg: Send + 'static>(
    command_line: String,
    to_message: Arc<dyn Fn(SystemOutcome) -> Msg + Send + Sync>,
    sink: Arc<dyn Sink<Msg>>,
) {
    let mut cmd = shell_command(&command_line);
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

    let output = match cmd.output().await {
        Ok(output) => output,
        Err(err) => {
            sink.send(to_message(SystemOutcome::Error(err.to_string())));
            return;
        }
    };

    sink.send(to_message(SystemOutcome::Finished {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        status: output.status.code().unwrap_or(-1),
    }));
}

/// Reads `reader` line by line, re-attaching the trailing newline `lines()`
/// strips, and forwards each line (wrapped by `variant`) on `tx`.
async fn read_lines<R: tokio::io::AsyncRead + Unpin>(
    reader: R,
    variant: fn(String) -> SystemOutcome,
    tx: mpsc::UnboundedSender<SystemOutcome>,
) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(variant(format!("{line}\n"))).is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(err) => {
                tracing::debug!(%err, "stream reader failed");
                return;
            }
        }
    }
}

async fn run_streaming<Msg: Send + 'static>(
    command_line: String,
    to_message: Arc<dyn Fn(SystemOutcome) -> Msg + Send + Sync>,
    sink: Arc<dyn Sink<Msg>>,
) {
    let mut cmd = shell_command(&command_line);
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            sink.send(to_message(SystemOutcome::Error(err.to_string())));
            return;
        }
    };

    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");

    let (tx, mut rx) = mpsc::unbounded_channel::<SystemOutcome>();

    let stdout_task = tokio::spawn(read_lines(stdout, SystemOutcome::Stdout, tx.clone()));
    let stderr_task = tokio::spawn(read_lines(stderr, SystemOutcome::Stderr, tx.clone()));
    drop(tx);

    let forward_sink = sink.clone();
    let forward_to_message = to_message.clone();
    let forward_task = tokio::spawn(async move {
        while let Some(outcome) = rx.recv().await {
            forward_sink.send(forward_to_message(outcome));
        }
    });

    let status = child.wait().await;

    for joined in [stdout_task, stderr_task] {
        if let Err(err) = joined.await {
            tracing::debug!(%err, "stream reader task failed to join");
        }
    }
    if let Err(err) = forward_task.await {
        tracing::debug!(%err, "stream forwarder task failed to join");
    }

    match status {
        Ok(status) => sink.send(to_message(SystemOutcome::Complete(status.code().unwrap_or(-1)))),
        Err(err) => sink.send(to_message(SystemOutcome::Error(err.to_string()))),
    }
}

fn dispatch_custom<Msg: Send + 'static>(
    cmd: CustomCommand<Msg>,
    sink: Arc<dyn Sink<Msg>>,
    ctx: DispatchCtx,
) -> JoinHandle<()> {
    let token = Token::new();
    let handle = cmd.handle;
    let grace = cmd.grace;
    let (tx, mut rx) = mpsc::unbounded_channel::<Msg>();
    let outlet = Outlet::new(tx);
    let callable = cmd.callable;
    let inner_token = token.clone();
    let done = Arc::new(Notify::new());
    let done_for_worker = done.clone();
    let active = ctx.active.clone();

    let worker = tokio::spawn(async move {
        let forwarder = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                sink.send(message);
            }
        });

        let outcome = std::panic::AssertUnwindSafe(callable(outlet, inner_token))
            .catch_unwind()
            .await;
        if outcome.is_err() {
            tracing::error!(?handle, "custom command's callable panicked");
        }

        if let Err(err) = forwarder.await {
            tracing::debug!(%err, "custom command's forwarder task failed to join");
        }
        active.remove(handle);
        done_for_worker.notify_one();
    });

    ctx.active.insert(handle, token, worker.abort_handle(), grace, done);
    worker
}

async fn dispatch_cancel(handle: Handle, ctx: DispatchCtx) {
    let Some(entry) = ctx.active.remove(handle) else {
        return;
    };
    entry.token.cancel();
    match entry.grace {
        Grace::Forever => {
            entry.done.notified().await;
        }
        Grace::After(duration) => {
            if tokio::time::timeout(duration, entry.done.notified())
                .await
                .is_err()
            {
                tracing::warn!(?handle, "custom command survived its grace period; aborting");
                entry.abort.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;

    #[tokio::test]
    async fn cancel_of_unknown_handle_is_a_no_op() {
        let ctx = DispatchCtx::new();
        let handle = Command::<()>::custom(|_, _| Box::pin(async {})).handle().unwrap();
        dispatch_cancel(handle, ctx.clone()).await;
        assert_eq!(ctx.active.len(), 0);
    }

    struct CollectingSink(Arc<Mutex<Vec<i32>>>);

    impl Sink<i32> for CollectingSink {
        fn send(&self, message: i32) {
            self.0.lock().unwrap().push(message);
        }
    }

    /// `Command::map(Command::map(c, f), g)` must deliver messages identical
    /// to mapping each output of `c` through `g ∘ f`.
    #[tokio::test]
    async fn nested_map_composes_its_mappers() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink: Arc<dyn Sink<i32>> = Arc::new(CollectingSink(received.clone()));

        let inner: Command<i32> = Command::custom(|outlet, _token| {
            Box::pin(async move {
                outlet.put(1);
                outlet.put(2);
            })
        });
        let mapped_once = Command::map(inner, |n: i32| n * 10);
        let mapped_twice = Command::map(mapped_once, |n: i32| n + 1);

        if let Some(worker) = dispatch(mapped_twice, sink, DispatchCtx::new()).await {
            worker.await.unwrap();
        }

        assert_eq!(*received.lock().unwrap(), vec![11, 21]);
    }
}
