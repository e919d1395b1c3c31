//! A harness for driving a [`tea_runtime::Model`] deterministically in
//! tests: terminal input is injected through a channel instead of read from
//! a real terminal, and the rendered frame is observable from outside the
//! runtime loop.

use std::io;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use ratatui::backend::{Backend, TestBackend, WindowSize};
use ratatui::buffer::{Buffer, Cell};
use ratatui::layout::Rect;
use ratatui::Terminal;
use tea_runtime::{EventSource, Model, Result as RuntimeResult, Runtime, RuntimeOptions, Synthetic, TermEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// An [`EventSource`] fed by a channel rather than a real terminal.
pub struct ChannelEvents {
    rx: mpsc::UnboundedReceiver<TermEvent>,
}

/// The sending half of a [`ChannelEvents`], used to inject events from the
/// test itself.
#[derive(Clone)]
pub struct ChannelEventsHandle {
    tx: mpsc::UnboundedSender<TermEvent>,
}

impl ChannelEvents {
    pub fn new() -> (Self, ChannelEventsHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, ChannelEventsHandle { tx })
    }
}

impl ChannelEventsHandle {
    pub fn send(&self, event: TermEvent) {
        let _ = self.tx.send(event);
    }

    pub fn send_key(&self, key_event: crossterm::event::KeyEvent) {
        self.send(TermEvent(crossterm::event::Event::Key(key_event)));
    }

    pub fn send_mouse(&self, mouse_event: crossterm::event::MouseEvent) {
        self.send(TermEvent(crossterm::event::Event::Mouse(mouse_event)));
    }
}

#[async_trait::async_trait]
impl EventSource for ChannelEvents {
    async fn poll(&mut self, timeout: Duration) -> RuntimeResult<Option<TermEvent>> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(event)) => Ok(Some(event)),
            Ok(None) => Ok(None),
            Err(_elapsed) => Ok(None),
        }
    }
}

/// Wraps a [`TestBackend`], mirroring its buffer into a shared cell on every
/// flush so a test can read what was last rendered without owning the
/// `Terminal` itself (the runtime loop does).
struct ObservingBackend {
    inner: TestBackend,
    buffer: Arc<RwLock<Buffer>>,
}

impl Backend for ObservingBackend {
    fn draw<'a, I>(&mut self, content: I) -> io::Result<()>
    where
        I: Iterator<Item = (u16, u16, &'a Cell)>,
    {
        self.inner.draw(content)
    }

    fn hide_cursor(&mut self) -> io::Result<()> {
        self.inner.hide_cursor()
    }

    fn show_cursor(&mut self) -> io::Result<()> {
        self.inner.show_cursor()
    }

    fn get_cursor(&mut self) -> io::Result<(u16, u16)> {
        self.inner.get_cursor()
    }

    fn set_cursor(&mut self, x: u16, y: u16) -> io::Result<()> {
        self.inner.set_cursor(x, y)
    }

    fn clear(&mut self) -> io::Result<()> {
        self.inner.clear()
    }

    fn size(&self) -> io::Result<Rect> {
        self.inner.size()
    }

    fn window_size(&mut self) -> io::Result<WindowSize> {
        self.inner.window_size()
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()?;
        *self.buffer.write().unwrap() = self.inner.buffer().clone();
        Ok(())
    }
}

/// Renders a [`Buffer`] to a plain string, one line per row, for assertions
/// that care about visible text rather than styling.
pub trait TerminalView {
    fn terminal_view(&self) -> String;
}

impl TerminalView for Buffer {
    fn terminal_view(&self) -> String {
        use std::fmt::Write;

        let Rect { width, height, .. } = self.area;
        let mut out = String::with_capacity((width * height) as usize);
        for row in 0..height {
            for col in 0..width {
                write!(&mut out, "{}", self.get(col, row).symbol()).unwrap();
            }
            writeln!(&mut out).unwrap();
        }
        out
    }
}

/// Drives one `Model` through a [`Runtime`] on a background task, exposing
/// input injection and rendered-frame observation to the test.
pub struct UiTester<M: Model> {
    events: ChannelEventsHandle,
    synthetic: mpsc::UnboundedSender<Synthetic>,
    buffer: Arc<RwLock<Buffer>>,
    handle: JoinHandle<RuntimeResult<M>>,
}

impl<M: Model> UiTester<M> {
    pub fn spawn(model: M, width: u16, height: u16) -> Self {
        Self::spawn_with_options(model, width, height, RuntimeOptions::default().with_poll_interval(Duration::from_millis(1)))
    }

    pub fn spawn_with_options(model: M, width: u16, height: u16, options: RuntimeOptions) -> Self {
        let buffer = Arc::new(RwLock::new(Buffer::empty(Rect::new(0, 0, width, height))));
        let backend = ObservingBackend {
            inner: TestBackend::new(width, height),
            buffer: buffer.clone(),
        };
        let mut terminal = Terminal::new(backend).expect("constructing a terminal over a test backend never fails");

        let (mut events, events_handle) = ChannelEvents::new();
        let runtime = Runtime::new(options);
        let synthetic = runtime.synthetic_sender();

        let handle = tokio::spawn(async move { runtime.run(model, &mut terminal, &mut events).await });

        Self {
            events: events_handle,
            synthetic,
            buffer,
            handle,
        }
    }

    pub fn send_key(&self, key_event: crossterm::event::KeyEvent) {
        self.events.send_key(key_event);
    }

    pub fn send_mouse(&self, mouse_event: crossterm::event::MouseEvent) {
        self.events.send_mouse(mouse_event);
    }

    pub fn send_event(&self, event: TermEvent) {
        self.events.send(event);
    }

    /// Asks the loop to join every pending worker and fully drain its inbox
    /// before the next render, then yields so it gets a chance to do so.
    /// Use this to observe the effect of a command deterministically instead
    /// of polling `wait_for` against timing.
    pub async fn sync(&self) {
        let _ = self.synthetic.send(Synthetic::Sync);
        tokio::task::yield_now().await;
    }

    pub fn view(&self) -> String {
        self.buffer.read().unwrap().terminal_view()
    }

    pub async fn wait_for(&self, f: impl FnMut(&str) -> bool) -> Result<(), String> {
        self.wait_for_timeout(f, Duration::from_secs(5)).await
    }

    pub async fn wait_for_timeout(&self, mut f: impl FnMut(&str) -> bool, timeout: Duration) -> Result<(), String> {
        let start = Instant::now();
        loop {
            let view = self.view();
            if f(&view) {
                return Ok(());
            }
            if start.elapsed() > timeout {
                return Err(view);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Drops the event source (ending the loop only if the model's `update`
    /// reacts to closed input by exiting) and waits for the runtime to
    /// finish, returning the final model.
    pub async fn join(self) -> RuntimeResult<M> {
        drop(self.events);
        self.handle.await.expect("runtime task panicked")
    }

    /// Force-stops the background runtime task without waiting for `Exit`.
    /// Use this in tests that only need to observe a rendered frame and
    /// don't drive the model to a natural stop.
    pub fn abort(&self) {
        self.handle.abort();
    }
}
