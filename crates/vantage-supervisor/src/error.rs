//! Error types for process supervision.

use std::time::Duration;

use thiserror::Error;

use crate::job::JobKind;

/// Errors raised while starting or supervising a job.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The process could not be spawned (binary missing, permission denied).
    #[error("Failed to spawn {kind} job '{program}': {message}")]
    SpawnFailed {
        kind: JobKind,
        program: String,
        message: String,
    },

    /// The preview process exited before printing its readiness marker.
    #[error("Preview server exited with code {code} before becoming ready")]
    StartupFailed { code: i32 },

    /// The preview process did not become ready in time and was killed.
    #[error("Preview server not ready after {0:?}")]
    ReadinessTimeout(Duration),

    /// A fetch job ran past its deadline and was killed.
    #[error("Fetch job timed out after {0:?}")]
    FetchTimeout(Duration),

    /// No local port is free in the configured range.
    #[error("No free preview port in range {start}..{end}")]
    PortExhausted { start: u16, end: u16 },

    /// A job of this kind is already running for the session.
    #[error("A {0} job is already running")]
    JobBusy(JobKind),
}

/// Result type for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;
