//! Session registry: creation, lookup, job orchestration and reclamation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vantage_supervisor::{JobContext, JobHandle, JobKind, Supervisor, SupervisorError};
use vantage_workspace::{ApplyReport, FileSet, WorkspaceManager};

use crate::error::{Result, ServerError};
use crate::session::{Session, SessionId, SessionSummary};

/// How long teardown waits for killed jobs before deleting the workspace.
const TEARDOWN_WAIT: Duration = Duration::from_secs(5);

/// Session lifecycle settings.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Sessions idle longer than this are reclaimed by the sweep.
    pub idle_timeout: Duration,
    /// Minimum time a disconnected session survives.
    pub disconnect_grace: Duration,
    /// Interval between sweeps.
    pub sweep_interval: Duration,
    /// How long a request waits for the per-session lock.
    pub lock_timeout: Duration,
    /// URL prefix the preview is served under, passed to jobs as `{base_path}`.
    pub base_path: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30 * 60),
            disconnect_grace: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(60),
            lock_timeout: Duration::from_secs(30),
            base_path: "/preview".to_string(),
        }
    }
}

impl RegistryConfig {
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_disconnect_grace(mut self, grace: Duration) -> Self {
        self.disconnect_grace = grace;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }
}

/// Where the preview of a session can be reached.
#[derive(Debug, Clone, Serialize)]
pub struct PreviewInfo {
    pub port: u16,
    /// Path under which the proxy serves it.
    pub path: String,
}

/// What a sweep did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Sessions torn down for inactivity.
    pub reclaimed: Vec<String>,
    /// Terminal job records dropped from live sessions.
    pub jobs_pruned: usize,
    /// Workspace directories that belonged to no session.
    pub orphans_removed: Vec<String>,
}

/// Owns every session. The only cross-session shared state besides the
/// supervisor's port arena.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    workspaces: Arc<WorkspaceManager>,
    supervisor: Supervisor,
    config: RegistryConfig,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.read().len())
            .field("config", &self.config)
            .finish()
    }
}

impl SessionRegistry {
    /// Create a registry. The supervisor must use the same workspace manager.
    pub fn new(supervisor: Supervisor, config: RegistryConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            workspaces: Arc::clone(supervisor.workspaces()),
            supervisor,
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Register a new session with a fresh id and an empty workspace.
    pub fn create_session(&self) -> Result<Arc<Session>> {
        // Registered before its directory exists, so orphan collection never
        // sees a directory without its session.
        let session = {
            let mut sessions = self.sessions.write();
            let mut id = SessionId::new();
            while sessions.contains_key(&id) {
                id = SessionId::new();
            }
            let session = Arc::new(Session::new(
                id,
                self.workspaces.workspace_path(&id.to_string()),
            ));
            sessions.insert(id, Arc::clone(&session));
            session
        };

        if let Err(e) = self.workspaces.ensure_workspace(&session.id().to_string()) {
            self.sessions.write().remove(&session.id());
            return Err(e.into());
        }

        info!(session_id = %session.id(), workspace = %session.workspace().display(), "Session created");
        Ok(session)
    }

    /// Look up a session by its textual id.
    pub fn get(&self, raw: &str) -> Result<Arc<Session>> {
        let sessions = self.sessions.read();
        raw.parse::<SessionId>()
            .ok()
            .and_then(|id| sessions.get(&id).cloned())
            .ok_or_else(|| unknown_session(raw, &sessions))
    }

    /// Fail requests that raced with the session's teardown.
    fn ensure_open(&self, session: &Session) -> Result<()> {
        if session.is_closed() {
            let id = session.id().to_string();
            return Err(unknown_session(&id, &self.sessions.read()));
        }
        Ok(())
    }

    /// Record a freshly started job, unless teardown got there first.
    fn record_job(&self, session: &Session, handle: JobHandle) -> Result<()> {
        if session.set_job(handle) {
            Ok(())
        } else {
            info!(session_id = %session.id(), "Job started on a closed session, killed");
            self.ensure_open(session)
        }
    }

    /// Diagnostics for every session.
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> =
            self.sessions.read().values().map(|s| s.summary()).collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }

    /// Tear down a session now: kill its jobs and delete its workspace.
    pub async fn remove(&self, raw: &str) -> Result<()> {
        let session = self.get(raw)?;
        self.sessions.write().remove(&session.id());
        self.teardown(&session).await;
        Ok(())
    }

    /// Tear down every session.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.write().drain().map(|(_, s)| s).collect();
        info!(count = sessions.len(), "Tearing down all sessions");
        futures::future::join_all(sessions.iter().map(|s| self.teardown(s))).await;
    }

    async fn teardown(&self, session: &Session) {
        let jobs = session.close();
        // In-flight requests see the closed flag when they record a job.
        let guard = session.lock(TEARDOWN_WAIT).await;
        if guard.is_err() {
            warn!(session_id = %session.id(), "Session still locked at teardown");
        }
        for job in &jobs {
            if tokio::time::timeout(TEARDOWN_WAIT, job.wait()).await.is_err() {
                warn!(session_id = %session.id(), job = %job.kind(), "Job did not exit after kill");
            }
        }

        let workspaces = Arc::clone(&self.workspaces);
        let id = session.id().to_string();
        let removed = tokio::task::spawn_blocking(move || workspaces.remove_workspace(&id)).await;
        match removed {
            Ok(Ok(())) => info!(session_id = %session.id(), jobs = jobs.len(), "Session torn down"),
            Ok(Err(e)) => warn!(session_id = %session.id(), error = %e, "Failed to remove workspace"),
            Err(e) => warn!(session_id = %session.id(), error = %e, "Workspace removal panicked"),
        }
        drop(guard);
    }

    // ── Operations ──────────────────────────────────────────────────────────

    /// Apply a file set to the session's workspace.
    ///
    /// A partial apply is an error carrying the full report.
    pub async fn upload(&self, raw: &str, files: FileSet) -> Result<ApplyReport> {
        let session = self.get(raw)?;
        session.touch();
        let _guard = session.lock(self.config.lock_timeout).await?;
        self.ensure_open(&session)?;
        self.apply(&session, files).await
    }

    /// Optionally apply files, then start a fetch job.
    ///
    /// The session lock stays held until the job's snapshot/diff cycle has
    /// finished, so uploads cannot interleave with it.
    pub async fn fetch(&self, raw: &str, files: Option<FileSet>) -> Result<JobHandle> {
        let session = self.get(raw)?;
        session.touch();
        ensure_idle(&session, JobKind::Fetch)?;

        let guard = session.lock(self.config.lock_timeout).await?;
        self.ensure_open(&session)?;
        ensure_idle(&session, JobKind::Fetch)?;
        if let Some(files) = files {
            self.apply(&session, files).await?;
        }

        let handle = self
            .supervisor
            .start_fetch_job(self.job_context(&session), session.events().clone(), guard)
            .await?;
        self.record_job(&session, handle.clone())?;
        Ok(handle)
    }

    /// Optionally apply files, then make sure a preview server is running.
    ///
    /// Returns once the server is ready. An already running preview is
    /// reused.
    pub async fn preview(&self, raw: &str, files: Option<FileSet>) -> Result<PreviewInfo> {
        let session = self.get(raw)?;
        session.touch();

        let _guard = session.lock(self.config.lock_timeout).await?;
        self.ensure_open(&session)?;
        if let Some(files) = files {
            self.apply(&session, files).await?;
        }

        if let Some(existing) = session.job(JobKind::Preview)
            && existing.is_running()
            && let Some(port) = existing.port()
        {
            debug!(session_id = %session.id(), port, "Reusing running preview");
            return Ok(self.preview_info(port));
        }

        let handle = self
            .supervisor
            .start_preview_server(self.job_context(&session), session.events().clone())
            .await?;
        let port = handle
            .port()
            .ok_or_else(|| ServerError::Internal("preview job without port".to_string()))?;
        self.record_job(&session, handle)?;
        Ok(self.preview_info(port))
    }

    /// Kill one job and drop its record. Returns whether a job existed.
    pub async fn kill_job(&self, raw: &str, kind: JobKind) -> Result<bool> {
        let session = self.get(raw)?;
        session.touch();
        match session.take_job(kind) {
            Some(handle) => {
                handle.kill();
                let state = handle.wait().await;
                info!(session_id = %session.id(), job = %kind, %state, "Job killed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Current content of the session's workspace.
    pub async fn snapshot(&self, raw: &str) -> Result<FileSet> {
        let session = self.get(raw)?;
        let workspaces = Arc::clone(&self.workspaces);
        let path = session.workspace().to_path_buf();
        tokio::task::spawn_blocking(move || workspaces.snapshot_workspace(&path))
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))?
            .map_err(Into::into)
    }

    async fn apply(&self, session: &Session, files: FileSet) -> Result<ApplyReport> {
        let workspaces = Arc::clone(&self.workspaces);
        let path = session.workspace().to_path_buf();
        let report = tokio::task::spawn_blocking(move || workspaces.apply_file_set(&path, &files))
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))?;

        if report.is_complete() {
            Ok(report)
        } else {
            warn!(session_id = %session.id(), failed = report.failed.len(), "Partial apply");
            Err(ServerError::Workspace(report))
        }
    }

    fn job_context(&self, session: &Session) -> JobContext {
        let mut ctx = JobContext::new(session.id().to_string(), session.workspace())
            .with_base_path(&self.config.base_path);
        let remote = session.remote();
        if let Some(preview_ref) = remote.preview_ref {
            ctx = ctx.with_env("VANTAGE_PREVIEW_REF", preview_ref);
        }
        if let Some(create_ref) = remote.create_ref {
            ctx = ctx.with_env("VANTAGE_CREATE_REF", create_ref);
        }
        ctx
    }

    fn preview_info(&self, port: u16) -> PreviewInfo {
        PreviewInfo {
            port,
            path: format!("{}/", self.config.base_path),
        }
    }

    // ── Reclamation ─────────────────────────────────────────────────────────

    /// Reclaim idle sessions, prune finished job records and delete orphan
    /// workspace directories.
    ///
    /// Jobs of reclaimed sessions are killed immediately.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        // Listed before reading the map; see `create_session`.
        let on_disk = {
            let workspaces = Arc::clone(&self.workspaces);
            match tokio::task::spawn_blocking(move || workspaces.list_workspaces()).await {
                Ok(Ok(ids)) => ids,
                Ok(Err(e)) => {
                    warn!(error = %e, "Failed to list workspaces");
                    Vec::new()
                }
                Err(e) => {
                    warn!(error = %e, "Workspace listing panicked");
                    Vec::new()
                }
            }
        };

        let expired: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write();
            let ids: Vec<SessionId> = sessions
                .values()
                .filter(|s| s.is_reclaimable(self.config.idle_timeout, self.config.disconnect_grace))
                .map(|s| s.id())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for session in &expired {
            info!(session_id = %session.id(), idle_secs = session.idle_for().as_secs(), "Reclaiming idle session");
            self.teardown(session).await;
            report.reclaimed.push(session.id().to_string());
        }

        let live: HashSet<String> = {
            let sessions = self.sessions.read();
            report.jobs_pruned = sessions.values().map(|s| s.prune_jobs()).sum();
            sessions.keys().map(SessionId::to_string).collect()
        };

        for id in on_disk {
            if live.contains(&id) || report.reclaimed.contains(&id) {
                continue;
            }
            match self.workspaces.remove_workspace(&id) {
                Ok(()) => {
                    info!(workspace = %id, "Removed orphan workspace");
                    report.orphans_removed.push(id);
                }
                Err(e) => warn!(workspace = %id, error = %e, "Failed to remove orphan workspace"),
            }
        }

        if !report.reclaimed.is_empty() || !report.orphans_removed.is_empty() || report.jobs_pruned > 0 {
            debug!(?report, "Sweep complete");
        }
        report
    }

    /// Run [`SessionRegistry::sweep`] every `sweep_interval` until cancelled.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(registry.config.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        registry.sweep().await;
                    }
                }
            }
            debug!("Session sweeper stopped");
        })
    }
}

fn unknown_session(raw: &str, sessions: &HashMap<SessionId, Arc<Session>>) -> ServerError {
    let mut known: Vec<String> = sessions.keys().map(SessionId::to_string).collect();
    known.sort();
    ServerError::UnknownSession {
        id: raw.to_string(),
        known,
    }
}

fn ensure_idle(session: &Session, kind: JobKind) -> Result<()> {
    match session.job(kind) {
        Some(handle) if !handle.state().is_terminal() => {
            Err(ServerError::Supervisor(SupervisorError::JobBusy(kind)))
        }
        _ => Ok(()),
    }
}
