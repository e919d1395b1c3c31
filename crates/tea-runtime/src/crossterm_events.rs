use std::time::Duration;

use futures::StreamExt;

use crate::error::{Error, Result};
use crate::event::{EventSource, TermEvent};

/// The production [`EventSource`]: reads from a real terminal via
/// [`crossterm::event::EventStream`], the same primitive the teacher crate
/// this one descends from used for its own event-reader task.
pub struct CrosstermEvents {
    stream: crossterm::event::EventStream,
}

impl CrosstermEvents {
    pub fn new() -> Self {
        Self {
            stream: crossterm::event::EventStream::new(),
        }
    }
}

impl Default for CrosstermEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EventSource for CrosstermEvents {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<TermEvent>> {
        match tokio::time::timeout(timeout, self.stream.next()).await {
            Ok(Some(Ok(event))) => Ok(Some(TermEvent(event))),
            Ok(Some(Err(err))) => Err(Error::Io(err)),
            Ok(None) => Ok(None),
            Err(_elapsed) => Ok(None),
        }
    }
}
