//! Job records: kind, state machine and the handle used to observe or kill a job.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Which external command a job runs. Also the `target` tag of its events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Fetch,
    Preview,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Fetch => "fetch",
            JobKind::Preview => "preview",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fetch" => Ok(JobKind::Fetch),
            "preview" => Ok(JobKind::Preview),
            other => Err(format!("unknown job kind: {other}")),
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Spawn has been issued.
    Starting,
    /// The OS process exists.
    Running,
    /// Exited with code 0.
    Succeeded,
    /// Spawn failed, exited non-zero, or exceeded its deadline.
    Failed,
    /// Explicitly killed.
    Killed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Killed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Starting => "starting",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Killed => "killed",
        };
        f.write_str(s)
    }
}

struct JobInner {
    id: Uuid,
    kind: JobKind,
    session_id: String,
    started_at: DateTime<Utc>,
    port: Option<u16>,
    state: watch::Sender<JobState>,
    exit_code: Mutex<Option<i32>>,
    cancel: CancellationToken,
}

/// Shared handle to a supervised job.
///
/// Cloning is cheap; all clones observe the same job. Dropping every handle
/// does not stop the process, only [`JobHandle::kill`] does.
#[derive(Clone)]
pub struct JobHandle {
    inner: Arc<JobInner>,
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("session_id", &self.inner.session_id)
            .field("port", &self.inner.port)
            .field("state", &self.state())
            .finish()
    }
}

impl JobHandle {
    /// Create a record in the `Starting` state.
    pub(crate) fn new(kind: JobKind, session_id: impl Into<String>, port: Option<u16>) -> Self {
        let (state, _) = watch::channel(JobState::Starting);
        Self {
            inner: Arc::new(JobInner {
                id: Uuid::new_v4(),
                kind,
                session_id: session_id.into(),
                started_at: Utc::now(),
                port,
                state,
                exit_code: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn kind(&self) -> JobKind {
        self.inner.kind
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// The local port a preview job is bound to.
    pub fn port(&self) -> Option<u16> {
        self.inner.port
    }

    pub fn state(&self) -> JobState {
        *self.inner.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == JobState::Running
    }

    /// Exit code once the process has exited (`-1` when killed by a signal).
    pub fn exit_code(&self) -> Option<i32> {
        *self.inner.exit_code.lock()
    }

    /// Request termination. Returns immediately; use [`JobHandle::wait`] to
    /// observe the `Killed` state.
    pub fn kill(&self) {
        self.inner.cancel.cancel();
    }

    /// Wait until the job reaches a terminal state and return it.
    pub async fn wait(&self) -> JobState {
        let mut rx = self.inner.state.subscribe();
        match rx.wait_for(JobState::is_terminal).await {
            Ok(state) => *state,
            // The sender lives in `inner`, which we hold.
            Err(_) => self.state(),
        }
    }

    pub(crate) fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.inner.cancel.cancelled()
    }

    pub(crate) fn set_state(&self, state: JobState) {
        self.inner.state.send_replace(state);
    }

    /// Record the exit code and move to a terminal state, in that order.
    pub(crate) fn finish(&self, state: JobState, code: i32) {
        *self.inner.exit_code.lock() = Some(code);
        self.set_state(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_kind_round_trip() {
        assert_eq!("fetch".parse::<JobKind>().unwrap(), JobKind::Fetch);
        assert_eq!("preview".parse::<JobKind>().unwrap(), JobKind::Preview);
        assert!("build".parse::<JobKind>().is_err());
        assert_eq!(JobKind::Preview.to_string(), "preview");
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Starting.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Killed.is_terminal());
    }

    #[tokio::test]
    async fn test_wait_observes_finish() {
        let handle = JobHandle::new(JobKind::Fetch, "s", None);
        assert_eq!(handle.state(), JobState::Starting);
        handle.set_state(JobState::Running);

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.finish(JobState::Failed, 3);

        assert_eq!(waiter.await.unwrap(), JobState::Failed);
        assert_eq!(handle.exit_code(), Some(3));
    }

    #[tokio::test]
    async fn test_kill_triggers_cancellation() {
        let handle = JobHandle::new(JobKind::Preview, "s", Some(4100));
        handle.kill();
        tokio::time::timeout(Duration::from_millis(100), handle.cancelled())
            .await
            .unwrap();
        assert_eq!(handle.port(), Some(4100));
    }
}
