//! Progress events for CLI consumption.
//!
//! The controller reports each state transition as a [`LoopEvent`]. When the
//! loop runs on a background task, the events travel over an mpsc channel
//! and the CLI reads them through a [`RunStream`].

use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::debug;

use crate::controller::RunReport;
use crate::error::CoreError;

/// Channel buffer size for loop events.
pub(crate) const EVENT_CHANNEL_SIZE: usize = 64;

/// Events emitted while the generate/test/fix loop runs.
#[derive(Debug)]
pub enum LoopEvent {
    /// The loop started planning a parser for `target`.
    Planning { target: String },

    /// A generation cycle started.
    Generating { attempt: u32 },

    /// Code was extracted and written to `path`.
    CodeWritten { path: PathBuf, bytes: usize },

    /// No code came out of this cycle; the loop will stop.
    GenerationFailed { feedback: String },

    /// The external test command is running.
    Testing,

    /// The external test command finished.
    TestResult { passed: bool },

    /// Verification failed and another attempt will be made.
    Fixing { attempt: u32 },

    /// The loop terminated.
    Finished(RunReport),

    /// The loop aborted on an unrecoverable error.
    Error(CoreError),
}

/// Where the controller sends its progress events.
///
/// A detached sink drops every event; it is what tests and library callers
/// that only want the final report use.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<LoopEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<LoopEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn detached() -> Self {
        Self::default()
    }

    /// Send an event. A closed receiver is not an error: the loop keeps
    /// running even if nobody is listening any more.
    pub async fn emit(&self, event: LoopEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(event).await.is_err() {
            debug!("event receiver dropped, discarding loop event");
        }
    }
}

/// Handle for consuming loop progress.
#[derive(Debug)]
pub struct RunStream {
    event_rx: mpsc::Receiver<LoopEvent>,
}

impl RunStream {
    pub(crate) fn new(event_rx: mpsc::Receiver<LoopEvent>) -> Self {
        Self { event_rx }
    }

    /// Next event, or `None` once the loop has finished and the channel is
    /// closed.
    pub async fn next(&mut self) -> Option<LoopEvent> {
        self.event_rx.recv().await
    }
}
