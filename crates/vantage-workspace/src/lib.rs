//! Session workspaces for Vantage.
//!
//! Every editing session owns one directory under a shared root. This crate
//! materializes uploaded file sets into that directory, reads it back as a
//! snapshot, and computes the minimal delta between two snapshots.
//!
//! # Layout
//!
//! ```text
//! <root>/<session-id>/
//! ├── settings.yml        # root content files: created/overwritten, never deleted by sync
//! ├── landscape.yml
//! ├── guide.yml
//! ├── cached_logos/...    # asset folders: authoritative replace
//! └── hosted_logos/...
//! ```
//!
//! Anything else under the session directory (build output, caches written by
//! the external tooling) is never touched by sync.

pub mod diff;
pub mod error;
pub mod fileset;
pub mod layout;
pub mod manager;

pub use diff::diff;
pub use error::{Result, WorkspaceError};
pub use fileset::{Change, Encoding, FileRecord, FileSet};
pub use layout::{ManagedLayout, PathKind, RootFile, validate_relative_path};
pub use manager::{ApplyReport, FailedPath, WorkspaceManager};
