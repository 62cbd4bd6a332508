//! Spawning and supervising fetch and preview jobs.

use std::ops::Range;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use vantage_workspace::{FileSet, WorkspaceManager, diff};

use crate::command::{CommandSpec, JobContext};
use crate::error::{Result, SupervisorError};
use crate::events::{EventSink, JobStatus, SessionEvent};
use crate::job::{JobHandle, JobKind, JobState};
use crate::ports::PortArena;

/// How long output readers may keep draining after the process exited.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Bounded batch command refreshing workspace data.
    pub fetch: CommandSpec,
    /// Long-lived preview server command. Should bind `{port}`.
    pub preview: CommandSpec,
    /// Substring on the preview's stdout signalling readiness.
    pub ready_marker: String,
    /// Upper bound on the readiness wait.
    pub readiness_timeout: Duration,
    /// Upper bound on a fetch job's run time. `None` means unbounded.
    pub fetch_timeout: Option<Duration>,
    /// Local ports available to preview servers.
    pub port_range: Range<u16>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            fetch: CommandSpec::new("landscape2").with_args([
                "build",
                "--data-file",
                "landscape.yml",
                "--settings-file",
                "settings.yml",
                "--guide-file",
                "guide.yml",
                "--logos-path",
                "hosted_logos",
                "--cache-dir",
                "cached_logos",
                "--output-dir",
                "build",
            ]),
            preview: CommandSpec::new("landscape2").with_args([
                "serve",
                "--landscape-dir",
                "build",
                "--addr",
                "127.0.0.1:{port}",
            ]),
            ready_marker: "listening".to_string(),
            readiness_timeout: Duration::from_secs(60),
            fetch_timeout: Some(Duration::from_secs(900)),
            port_range: 4100..4300,
        }
    }
}

/// Starts jobs and supervises them until they exit.
///
/// Supervision runs on detached tasks; the only call that waits on a child
/// is [`Supervisor::start_preview_server`], and only until readiness.
pub struct Supervisor {
    config: SupervisorConfig,
    ports: Arc<PortArena>,
    workspaces: Arc<WorkspaceManager>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .field("ports", &self.ports)
            .finish()
    }
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, workspaces: Arc<WorkspaceManager>) -> Self {
        let ports = Arc::new(PortArena::new(config.port_range.clone()));
        Self {
            config,
            ports,
            workspaces,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn ports(&self) -> &Arc<PortArena> {
        &self.ports
    }

    pub fn workspaces(&self) -> &Arc<WorkspaceManager> {
        &self.workspaces
    }

    /// Start a fetch job and return once the process is running.
    ///
    /// Output lines are emitted as `message` events. On exit a `finish` event
    /// is emitted, then the workspace is re-snapshotted and the delta against
    /// the pre-job snapshot goes out as a `files` event, followed by a
    /// `success`/`failure` status.
    ///
    /// `hold` is kept alive until that whole cycle has completed, which lets
    /// callers pass a per-session lock guard.
    pub async fn start_fetch_job<G>(&self, ctx: JobContext, sink: EventSink, hold: G) -> Result<JobHandle>
    where
        G: Send + 'static,
    {
        let kind = JobKind::Fetch;
        let baseline = self.snapshot(&ctx.workspace).await.unwrap_or_else(|e| {
            warn!(session_id = %ctx.session_id, error = %e, "No pre-fetch snapshot, diffing against empty set");
            FileSet::new()
        });

        let handle = JobHandle::new(kind, &ctx.session_id, None);
        let mut child = self.spawn(&self.config.fetch, &ctx, None, &handle, &sink)?;
        info!(session_id = %ctx.session_id, job = %kind, pid = ?child.id(), "Fetch job started");

        let stdout = child.stdout.take().map(|r| spawn_reader(r, kind, sink.clone(), None));
        let stderr = child.stderr.take().map(|r| spawn_reader(r, kind, sink.clone(), None));

        let fetch_timeout = self.config.fetch_timeout;
        let workspaces = Arc::clone(&self.workspaces);
        let task_handle = handle.clone();
        tokio::spawn(async move {
            let handle = task_handle;
            let exit = supervise(&mut child, &handle, deadline(fetch_timeout)).await;
            drain_readers([stdout, stderr]).await;

            let (state, code) = exit.outcome();
            if let Exit::TimedOut(limit) = exit {
                sink.emit(SessionEvent::message(
                    kind,
                    SupervisorError::FetchTimeout(limit).to_string(),
                ));
            }
            sink.emit(SessionEvent::Finish { target: kind, code });

            let workspace = ctx.workspace.clone();
            let after = tokio::task::spawn_blocking(move || workspaces.snapshot_workspace(&workspace)).await;
            match after {
                Ok(Ok(after)) => {
                    let changes = diff(&baseline, &after);
                    debug!(session_id = %ctx.session_id, changes = changes.len(), "Fetch produced changes");
                    sink.emit(SessionEvent::Files { changes });
                }
                Ok(Err(e)) => {
                    warn!(session_id = %ctx.session_id, error = %e, "Post-fetch snapshot failed");
                    sink.emit(SessionEvent::message(kind, format!("Snapshot failed: {e}")));
                }
                Err(e) => warn!(session_id = %ctx.session_id, error = %e, "Snapshot task panicked"),
            }

            let status = if state == JobState::Succeeded {
                JobStatus::Success
            } else {
                JobStatus::Failure
            };
            sink.emit(SessionEvent::status(kind, status));
            handle.finish(state, code);
            info!(session_id = %ctx.session_id, job = %kind, %state, code, "Fetch job finished");
            drop(hold);
        });

        Ok(handle)
    }

    /// Start a preview server and wait until it prints the readiness marker.
    ///
    /// Fails with [`SupervisorError::StartupFailed`] if the process exits
    /// first, or [`SupervisorError::ReadinessTimeout`] (after killing it) if
    /// the marker does not appear in time. A `finish` event is emitted
    /// whenever the process exits. Any exit before readiness, a clean one
    /// included, ends the job as `Failed` with a `failure` status.
    pub async fn start_preview_server(&self, ctx: JobContext, sink: EventSink) -> Result<JobHandle> {
        let kind = JobKind::Preview;
        let lease = self.ports.allocate()?;
        let port = lease.port();

        let handle = JobHandle::new(kind, &ctx.session_id, Some(port));
        let mut child = self.spawn(&self.config.preview, &ctx, Some(port), &handle, &sink)?;
        info!(session_id = %ctx.session_id, job = %kind, port, pid = ?child.id(), "Preview server starting");

        let (ready_tx, mut ready_rx) = oneshot::channel();
        let marker = ReadyMarker::new(&self.config.ready_marker, ready_tx);
        let ready = Arc::clone(&marker.seen);
        let stdout = child.stdout.take().map(|r| spawn_reader(r, kind, sink.clone(), Some(marker)));
        let stderr = child.stderr.take().map(|r| spawn_reader(r, kind, sink.clone(), None));

        let limit = self.config.readiness_timeout;
        let abandon = CancellationToken::new();
        let task_abandon = abandon.clone();
        let task_handle = handle.clone();
        let task_sink = sink.clone();
        let session_id = ctx.session_id.clone();
        tokio::spawn(async move {
            let handle = task_handle;
            let expire = async move {
                task_abandon.cancelled().await;
                limit
            };
            let exit = supervise(&mut child, &handle, expire).await;
            drain_readers([stdout, stderr]).await;

            let (mut state, code) = exit.outcome();
            if !ready.load(Ordering::Acquire) && state == JobState::Succeeded {
                state = JobState::Failed;
            }
            if let Exit::TimedOut(limit) = exit {
                task_sink.emit(SessionEvent::message(
                    kind,
                    SupervisorError::ReadinessTimeout(limit).to_string(),
                ));
            }
            task_sink.emit(SessionEvent::Finish { target: kind, code });
            if state == JobState::Failed {
                task_sink.emit(SessionEvent::status(kind, JobStatus::Failure));
            }
            handle.finish(state, code);
            info!(session_id = %session_id, job = %kind, port, %state, code, "Preview server exited");
            drop(lease);
        });

        let outcome = tokio::time::timeout(limit, async {
            tokio::select! {
                biased;
                Ok(()) = &mut ready_rx => None,
                state = handle.wait() => Some(state),
            }
        })
        .await;

        match outcome {
            Ok(None) => {
                info!(session_id = %ctx.session_id, port, "Preview server ready");
                sink.emit(SessionEvent::status(kind, JobStatus::Success));
                Ok(handle)
            }
            Ok(Some(state)) => {
                let code = handle.exit_code().unwrap_or(-1);
                warn!(session_id = %ctx.session_id, %state, code, "Preview server exited before becoming ready");
                Err(SupervisorError::StartupFailed { code })
            }
            Err(_) => {
                warn!(session_id = %ctx.session_id, ?limit, "Preview server readiness timed out");
                abandon.cancel();
                Err(SupervisorError::ReadinessTimeout(limit))
            }
        }
    }

    async fn snapshot(&self, workspace: &std::path::Path) -> vantage_workspace::Result<FileSet> {
        let workspaces = Arc::clone(&self.workspaces);
        let workspace: PathBuf = workspace.to_path_buf();
        match tokio::task::spawn_blocking(move || workspaces.snapshot_workspace(&workspace)).await {
            Ok(result) => result,
            Err(e) => Err(vantage_workspace::WorkspaceError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other(e),
            }),
        }
    }

    /// Spawn a command, moving the handle to `Running` or `Failed`.
    fn spawn(
        &self,
        spec: &CommandSpec,
        ctx: &JobContext,
        port: Option<u16>,
        handle: &JobHandle,
        sink: &EventSink,
    ) -> Result<Child> {
        let kind = handle.kind();
        sink.emit(SessionEvent::status(kind, JobStatus::Progress));

        match spec.build(ctx, port).spawn() {
            Ok(child) => {
                handle.set_state(JobState::Running);
                Ok(child)
            }
            Err(e) => {
                warn!(session_id = %ctx.session_id, job = %kind, program = %spec.program, error = %e, "Spawn failed");
                let err = SupervisorError::SpawnFailed {
                    kind,
                    program: spec.program.clone(),
                    message: e.to_string(),
                };
                sink.emit(SessionEvent::message(kind, err.to_string()));
                sink.emit(SessionEvent::status(kind, JobStatus::Failure));
                handle.finish(JobState::Failed, -1);
                Err(err)
            }
        }
    }
}

/// How a supervised process ended.
enum Exit {
    Exited(std::io::Result<ExitStatus>),
    Killed,
    TimedOut(Duration),
}

impl Exit {
    fn outcome(&self) -> (JobState, i32) {
        match self {
            Exit::Exited(Ok(status)) => {
                let code = status.code().unwrap_or(-1);
                let state = if status.success() {
                    JobState::Succeeded
                } else {
                    JobState::Failed
                };
                (state, code)
            }
            Exit::Exited(Err(_)) => (JobState::Failed, -1),
            Exit::Killed => (JobState::Killed, -1),
            Exit::TimedOut(_) => (JobState::Failed, -1),
        }
    }
}

/// Wait for the child to exit, be killed, or for `expire` to resolve with the
/// limit it enforced.
async fn supervise<F>(child: &mut Child, handle: &JobHandle, expire: F) -> Exit
where
    F: Future<Output = Duration>,
{
    let exit = tokio::select! {
        status = child.wait() => return Exit::Exited(status),
        _ = handle.cancelled() => Exit::Killed,
        limit = expire => Exit::TimedOut(limit),
    };

    if let Err(e) = child.kill().await {
        warn!(session_id = %handle.session_id(), job = %handle.kind(), error = %e, "Failed to kill process");
    }
    exit
}

fn deadline(limit: Option<Duration>) -> impl Future<Output = Duration> {
    async move {
        match limit {
            Some(limit) => {
                tokio::time::sleep(limit).await;
                limit
            }
            None => std::future::pending().await,
        }
    }
}

/// Readiness marker watched on a preview server's stdout.
struct ReadyMarker {
    text: String,
    seen: Arc<AtomicBool>,
    tx: Option<oneshot::Sender<()>>,
}

impl ReadyMarker {
    fn new(text: &str, tx: oneshot::Sender<()>) -> Self {
        Self {
            text: text.to_string(),
            seen: Arc::new(AtomicBool::new(false)),
            tx: Some(tx),
        }
    }

    fn observe(&mut self, line: &str) {
        if self.tx.is_some() && line.contains(self.text.as_str()) {
            self.seen.store(true, Ordering::Release);
            if let Some(tx) = self.tx.take() {
                let _ = tx.send(());
            }
        }
    }
}

/// Forward each output line as a `message` event. Invalid UTF-8 is replaced
/// rather than ending the stream. When `marker` is given it sees every stdout
/// line.
fn spawn_reader<R>(reader: R, kind: JobKind, sink: EventSink, marker: Option<ReadyMarker>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut marker = marker;
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']);
                    trace!(job = %kind, line = %line, "Job output");
                    if let Some(marker) = marker.as_mut() {
                        marker.observe(line);
                    }
                    sink.emit(SessionEvent::message(kind, line));
                }
                Err(e) => {
                    debug!(job = %kind, error = %e, "Output stream closed");
                    break;
                }
            }
        }
    })
}

async fn drain_readers(readers: [Option<JoinHandle<()>>; 2]) {
    let drain = async {
        for reader in readers.into_iter().flatten() {
            let _ = reader.await;
        }
    };
    if tokio::time::timeout(READER_DRAIN_TIMEOUT, drain).await.is_err() {
        debug!("Output readers still open after exit");
    }
}
