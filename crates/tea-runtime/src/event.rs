use std::time::Duration;

use crate::error::Result;

/// A single terminal input event, with the predicates a router registration
/// needs to match on. Wraps [`crossterm::event::Event`] rather than
/// reinventing key/mouse decoding — the terminal backend itself is an
/// external collaborator this crate only consumes through this interface.
#[derive(Debug, Clone)]
pub struct TermEvent(pub crossterm::event::Event);

impl TermEvent {
    pub fn is_key(&self) -> bool {
        matches!(self.0, crossterm::event::Event::Key(_))
    }

    pub fn is_mouse(&self) -> bool {
        matches!(self.0, crossterm::event::Event::Mouse(_))
    }

    pub fn key_event(&self) -> Option<&crossterm::event::KeyEvent> {
        match &self.0 {
            crossterm::event::Event::Key(key) => Some(key),
            _ => None,
        }
    }

    pub fn mouse_event(&self) -> Option<&crossterm::event::MouseEvent> {
        match &self.0 {
            crossterm::event::Event::Mouse(mouse) => Some(mouse),
            _ => None,
        }
    }

    pub fn is_char(&self, c: char) -> bool {
        use crossterm::event::KeyCode;
        matches!(self.key_event(), Some(key) if key.code == KeyCode::Char(c))
    }

    pub fn is_ctrl_c(&self) -> bool {
        use crossterm::event::{KeyCode, KeyModifiers};
        matches!(
            self.key_event(),
            Some(key) if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL)
        )
    }

    pub fn is_enter(&self) -> bool {
        use crossterm::event::KeyCode;
        matches!(self.key_event(), Some(key) if key.code == KeyCode::Enter)
    }

    pub fn is_esc(&self) -> bool {
        use crossterm::event::KeyCode;
        matches!(self.key_event(), Some(key) if key.code == KeyCode::Esc)
    }

    pub fn is_scroll_up(&self) -> bool {
        use crossterm::event::MouseEventKind;
        matches!(self.mouse_event(), Some(m) if m.kind == MouseEventKind::ScrollUp)
    }

    pub fn is_scroll_down(&self) -> bool {
        use crossterm::event::MouseEventKind;
        matches!(self.mouse_event(), Some(m) if m.kind == MouseEventKind::ScrollDown)
    }

    pub fn is_click(&self) -> bool {
        use crossterm::event::MouseEventKind;
        matches!(
            self.mouse_event(),
            Some(m) if matches!(m.kind, MouseEventKind::Down(_))
        )
    }

    pub fn position(&self) -> Option<(u16, u16)> {
        self.mouse_event().map(|m| (m.column, m.row))
    }
}

/// A synthetic event the runtime loop reacts to directly, never forwarding
/// it through `update`. `Sync` is the mechanism that gives deterministic
/// observation in tests: it asks the loop to join every currently pending
/// worker and fully drain the inbox before rendering again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Synthetic {
    Sync,
}

/// The external input-source interface the runtime loop polls every
/// iteration. Production code implements this over a real terminal
/// (see [`crate::crossterm_events::CrosstermEvents`]); the test harness
/// implements it over a channel so events can be injected deterministically.
#[async_trait::async_trait]
pub trait EventSource: Send {
    /// Waits up to `timeout` for one event. Returns `Ok(None)` on timeout —
    /// the sentinel "no event" the runtime loop treats as "nothing to do
    /// this iteration", not a failure.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<TermEvent>>;
}
