//! Session events and the sink that routes them to a connected client.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use vantage_workspace::Change;

use crate::job::JobKind;

/// Maximum number of events retained while no client is attached.
pub const DEFAULT_BACKLOG: usize = 256;

/// Coarse progress reported for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Progress,
    Success,
    Failure,
}

/// Everything the supervisor reports about a session's jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// One line of subprocess output.
    Message { target: JobKind, text: String },
    /// Coarse progress.
    Status { target: JobKind, status: JobStatus },
    /// The process exited. `code` is `-1` when no exit code was available.
    Finish { target: JobKind, code: i32 },
    /// Workspace changes produced by a fetch job.
    Files { changes: Vec<Change> },
}

impl SessionEvent {
    pub fn message(target: JobKind, text: impl Into<String>) -> Self {
        Self::Message {
            target,
            text: text.into(),
        }
    }

    pub fn status(target: JobKind, status: JobStatus) -> Self {
        Self::Status { target, status }
    }
}

#[derive(Default)]
struct SinkInner {
    tx: Option<mpsc::UnboundedSender<SessionEvent>>,
    backlog: VecDeque<SessionEvent>,
}

/// Per-session event dispatcher.
///
/// While a client channel is attached, events are forwarded in emission
/// order. While detached, the most recent [`DEFAULT_BACKLOG`] events are kept
/// and replayed on the next [`EventSink::attach`].
#[derive(Clone, Default)]
pub struct EventSink {
    inner: Arc<Mutex<SinkInner>>,
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("EventSink")
            .field("attached", &inner.tx.is_some())
            .field("backlog", &inner.backlog.len())
            .finish()
    }
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a client channel, replaying any buffered events first.
    ///
    /// Replaces a previously attached channel.
    pub fn attach(&self, tx: mpsc::UnboundedSender<SessionEvent>) {
        let mut inner = self.inner.lock();
        while let Some(event) = inner.backlog.pop_front() {
            if let Err(mpsc::error::SendError(event)) = tx.send(event) {
                inner.backlog.push_front(event);
                return;
            }
        }
        inner.tx = Some(tx);
    }

    /// Detach the client channel. Subsequent events are buffered.
    pub fn detach(&self) {
        self.inner.lock().tx = None;
    }

    pub fn is_attached(&self) -> bool {
        self.inner
            .lock()
            .tx
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Deliver an event, or buffer it when no client can receive it.
    pub fn emit(&self, event: SessionEvent) {
        let mut inner = self.inner.lock();
        let event = match inner.tx.as_ref() {
            Some(tx) => match tx.send(event) {
                Ok(()) => return,
                Err(mpsc::error::SendError(event)) => {
                    inner.tx = None;
                    event
                }
            },
            None => event,
        };
        if inner.backlog.len() >= DEFAULT_BACKLOG {
            inner.backlog.pop_front();
        }
        inner.backlog.push_back(event);
    }

    /// Number of buffered events.
    pub fn backlog_len(&self) -> usize {
        self.inner.lock().backlog.len()
    }
}
