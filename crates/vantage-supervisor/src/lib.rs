//! Process supervision for Vantage sessions.
//!
//! A session can run at most one *fetch* job (a bounded batch command that
//! refreshes data in the workspace) and one *preview* job (a long-lived
//! server bound to an allocated local port). Every line the subprocesses print
//! is streamed to the session as a [`SessionEvent`].
//!
//! # Job lifecycle
//!
//! ```text
//! Starting ──spawn ok──▶ Running ──exit 0──▶ Succeeded
//!     │                     ├──exit ≠0 / timeout──▶ Failed
//!     └──spawn error──▶ Failed  └──kill──▶ Killed
//! ```

pub mod command;
pub mod error;
pub mod events;
pub mod job;
pub mod ports;
pub mod supervisor;

pub use command::{CommandSpec, JobContext};
pub use error::{Result, SupervisorError};
pub use events::{EventSink, JobStatus, SessionEvent, DEFAULT_BACKLOG};
pub use job::{JobHandle, JobKind, JobState};
pub use ports::{PortArena, PortLease};
pub use supervisor::{Supervisor, SupervisorConfig};
