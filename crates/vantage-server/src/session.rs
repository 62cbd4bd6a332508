//! Per-session state.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedMutexGuard, mpsc};
use uuid::Uuid;
use vantage_supervisor::{EventSink, JobHandle, JobKind, JobState, SessionEvent};

use crate::error::{Result, ServerError};

/// Opaque, unguessable session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Result of the repository connector, recorded on the session and passed
/// to jobs as environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRef {
    #[serde(default)]
    pub preview_ref: Option<String>,
    #[serde(default)]
    pub create_ref: Option<String>,
}

#[derive(Debug, Default)]
struct Jobs {
    fetch: Option<JobHandle>,
    preview: Option<JobHandle>,
    /// Set by teardown. No job may be recorded afterwards.
    closed: bool,
}

impl Jobs {
    fn slot(&mut self, kind: JobKind) -> &mut Option<JobHandle> {
        match kind {
            JobKind::Fetch => &mut self.fetch,
            JobKind::Preview => &mut self.preview,
        }
    }
}

#[derive(Debug)]
struct Connection {
    /// Generation of the attached channel, `None` while detached.
    current: Option<u64>,
    next: u64,
    detached_at: Option<Instant>,
}

/// Token identifying one attached channel. Stale tokens cannot detach a
/// newer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionToken(u64);

/// One client's isolated workspace, jobs and event channel.
pub struct Session {
    id: SessionId,
    workspace: PathBuf,
    created_at: DateTime<Utc>,
    events: EventSink,
    lock: Arc<tokio::sync::Mutex<()>>,
    jobs: Mutex<Jobs>,
    connection: Mutex<Connection>,
    last_activity: Mutex<Instant>,
    remote: Mutex<RemoteRef>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("workspace", &self.workspace)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Snapshot of a session for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub workspace: PathBuf,
    pub created_at: DateTime<Utc>,
    pub connected: bool,
    pub preview_port: Option<u16>,
    pub fetch: Option<JobState>,
    pub preview: Option<JobState>,
    pub idle_secs: u64,
    pub remote: RemoteRef,
}

impl Session {
    pub(crate) fn new(id: SessionId, workspace: PathBuf) -> Self {
        Self {
            id,
            workspace,
            created_at: Utc::now(),
            events: EventSink::new(),
            lock: Arc::new(tokio::sync::Mutex::new(())),
            jobs: Mutex::new(Jobs::default()),
            connection: Mutex::new(Connection {
                current: None,
                next: 0,
                detached_at: Some(Instant::now()),
            }),
            last_activity: Mutex::new(Instant::now()),
            remote: Mutex::new(RemoteRef::default()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Emit an event to the session's channel (or its backlog).
    pub fn emit(&self, event: SessionEvent) {
        self.events.emit(event);
    }

    // ── Activity ────────────────────────────────────────────────────────────

    /// Record activity (proxied request, API call, channel ping).
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Whether the sweep may reclaim this session.
    ///
    /// A session is reclaimable once it has been idle for `idle_timeout`,
    /// unless it lost its channel less than `grace` ago.
    pub fn is_reclaimable(&self, idle_timeout: Duration, grace: Duration) -> bool {
        if self.idle_for() < idle_timeout {
            return false;
        }
        let connection = self.connection.lock();
        match connection.detached_at {
            Some(at) if connection.current.is_none() => at.elapsed() >= grace,
            _ => true,
        }
    }

    // ── Channel ─────────────────────────────────────────────────────────────

    /// Attach a client channel. Buffered events are replayed into it.
    pub fn connect(&self, tx: mpsc::UnboundedSender<SessionEvent>) -> ConnectionToken {
        let token = {
            let mut connection = self.connection.lock();
            let token = connection.next;
            connection.next += 1;
            connection.current = Some(token);
            connection.detached_at = None;
            token
        };
        self.events.attach(tx);
        self.touch();
        ConnectionToken(token)
    }

    /// Detach the channel identified by `token`, if it is still the current one.
    pub fn disconnect(&self, token: ConnectionToken) {
        let mut connection = self.connection.lock();
        if connection.current == Some(token.0) {
            connection.current = None;
            connection.detached_at = Some(Instant::now());
            self.events.detach();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.lock().current.is_some()
    }

    // ── Locking ─────────────────────────────────────────────────────────────

    /// Acquire the session's single-writer lock.
    pub async fn lock(&self, timeout: Duration) -> Result<OwnedMutexGuard<()>> {
        tokio::time::timeout(timeout, Arc::clone(&self.lock).lock_owned())
            .await
            .map_err(|_| ServerError::SessionBusy(self.id.to_string()))
    }

    // ── Jobs ────────────────────────────────────────────────────────────────

    pub fn job(&self, kind: JobKind) -> Option<JobHandle> {
        self.jobs.lock().slot(kind).clone()
    }

    /// Record a job. On a closed session the job is killed instead and
    /// `false` is returned.
    pub(crate) fn set_job(&self, handle: JobHandle) -> bool {
        let kind = handle.kind();
        let mut jobs = self.jobs.lock();
        if jobs.closed {
            drop(jobs);
            handle.kill();
            return false;
        }
        *jobs.slot(kind) = Some(handle);
        true
    }

    /// Remove the job record of `kind`, returning it.
    pub(crate) fn take_job(&self, kind: JobKind) -> Option<JobHandle> {
        self.jobs.lock().slot(kind).take()
    }

    /// Drop job records that reached a terminal state. Returns how many.
    pub(crate) fn prune_jobs(&self) -> usize {
        let mut jobs = self.jobs.lock();
        let mut pruned = 0;
        for kind in [JobKind::Fetch, JobKind::Preview] {
            let slot = jobs.slot(kind);
            if slot.as_ref().is_some_and(|h| h.state().is_terminal()) {
                *slot = None;
                pruned += 1;
            }
        }
        pruned
    }

    pub fn is_closed(&self) -> bool {
        self.jobs.lock().closed
    }

    /// Port of the preview server the proxy should forward to.
    pub fn preview_port(&self) -> Result<u16> {
        let handle = self
            .job(JobKind::Preview)
            .ok_or_else(|| ServerError::ProxyNotReady(self.id.to_string()))?;
        match handle.port() {
            Some(port) if handle.is_running() => Ok(port),
            _ => Err(ServerError::ProxyNotRunning(self.id.to_string())),
        }
    }

    /// Mark the session closed, kill every job and clear the records.
    pub(crate) fn close(&self) -> Vec<JobHandle> {
        let mut jobs = self.jobs.lock();
        jobs.closed = true;
        let handles: Vec<JobHandle> = [jobs.fetch.take(), jobs.preview.take()]
            .into_iter()
            .flatten()
            .collect();
        for handle in &handles {
            handle.kill();
        }
        handles
    }

    // ── Remote reference ────────────────────────────────────────────────────

    pub fn remote(&self) -> RemoteRef {
        self.remote.lock().clone()
    }

    pub fn set_remote(&self, remote: RemoteRef) {
        *self.remote.lock() = remote;
    }

    pub fn summary(&self) -> SessionSummary {
        let fetch = self.job(JobKind::Fetch);
        let preview = self.job(JobKind::Preview);
        SessionSummary {
            id: self.id.to_string(),
            workspace: self.workspace.clone(),
            created_at: self.created_at,
            connected: self.is_connected(),
            preview_port: preview.as_ref().and_then(JobHandle::port),
            fetch: fetch.as_ref().map(JobHandle::state),
            preview: preview.as_ref().map(JobHandle::state),
            idle_secs: self.idle_for().as_secs(),
            remote: self.remote(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vantage_supervisor::JobKind;

    fn session() -> Session {
        Session::new(SessionId::new(), PathBuf::from("/tmp/vantage/x"))
    }

    #[test]
    fn test_session_id_parse() {
        let id = SessionId::new();
        assert_eq!(id.to_string().parse::<SessionId>().unwrap(), id);
        assert!("../etc".parse::<SessionId>().is_err());
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn test_stale_connection_cannot_detach() {
        let session = session();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        let first = session.connect(tx1);
        let second = session.connect(tx2);
        session.disconnect(first);
        assert!(session.is_connected());

        session.emit(SessionEvent::message(JobKind::Fetch, "still here"));
        assert!(rx2.try_recv().is_ok());

        session.disconnect(second);
        assert!(!session.is_connected());
    }

    #[test]
    fn test_reclaim_rules() {
        let session = session();
        // Fresh sessions are not idle.
        assert!(!session.is_reclaimable(Duration::from_secs(60), Duration::ZERO));
        // Zero timeouts reclaim immediately.
        assert!(session.is_reclaimable(Duration::ZERO, Duration::ZERO));

        // A recently disconnected session is kept for the grace period.
        let (tx, _rx) = mpsc::unbounded_channel();
        let token = session.connect(tx);
        session.disconnect(token);
        assert!(!session.is_reclaimable(Duration::ZERO, Duration::from_secs(60)));

        // Connected but idle sessions are reclaimable.
        let (tx, _rx) = mpsc::unbounded_channel();
        session.connect(tx);
        assert!(session.is_reclaimable(Duration::ZERO, Duration::from_secs(60)));
    }

    #[test]
    fn test_preview_port_without_job() {
        let session = session();
        assert!(matches!(
            session.preview_port(),
            Err(ServerError::ProxyNotReady(_))
        ));
    }

    #[tokio::test]
    async fn test_lock_times_out() {
        let session = session();
        let _held = session.lock(Duration::from_secs(1)).await.unwrap();
        let err = session.lock(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, ServerError::SessionBusy(_)));
    }
}
