//! On-disk workspace management.
//!
//! One directory per session under a shared root. All operations are
//! synchronous; async callers run them on the blocking pool.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{Result, WorkspaceError};
use crate::fileset::{Change, FileRecord, FileSet};
use crate::layout::{ManagedLayout, PathKind, validate_relative_path};

/// A path that could not be applied, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPath {
    pub path: String,
    pub error: String,
}

/// Per-path outcome of applying a file set or a change list.
///
/// Application is not atomic across the set: a failure on one path leaves the
/// others applied. Every path ends up in exactly one bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    /// Paths whose content was written.
    pub written: Vec<String>,
    /// Paths whose on-disk content already matched.
    pub unchanged: Vec<String>,
    /// Asset paths removed during reconciliation (or by a `Deleted` change).
    pub deleted: Vec<String>,
    /// Paths ignored because they are invalid or outside the managed layout.
    pub rejected: Vec<String>,
    /// Paths that failed with an I/O or decode error.
    pub failed: Vec<FailedPath>,
}

impl ApplyReport {
    /// True when no path failed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn fail(&mut self, path: impl Into<String>, error: impl ToString) {
        self.failed.push(FailedPath {
            path: path.into(),
            error: error.to_string(),
        });
    }
}

/// Owns the directory tree of every session workspace.
///
/// This struct is `Send + Sync` (only contains paths and the layout).
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
    layout: ManagedLayout,
}

impl WorkspaceManager {
    /// Create a manager rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>, layout: ManagedLayout) -> Self {
        Self {
            root: root.into(),
            layout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layout(&self) -> &ManagedLayout {
        &self.layout
    }

    /// Checks if a session ID can be used as a directory name.
    ///
    /// Valid IDs are non-empty, contain only ASCII alphanumerics, hyphens and
    /// underscores, and do not start with a hyphen.
    pub fn is_valid_session_id(id: &str) -> bool {
        !id.is_empty()
            && !id.starts_with('-')
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    /// Directory of a session's workspace (may not exist yet).
    pub fn workspace_path(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    /// Create the session's directory tree if absent. Idempotent.
    pub fn ensure_workspace(&self, session_id: &str) -> Result<PathBuf> {
        if !Self::is_valid_session_id(session_id) {
            return Err(WorkspaceError::InvalidSessionId(session_id.to_string()));
        }

        let path = self.workspace_path(session_id);
        for folder in &self.layout.asset_folders {
            let dir = path.join(folder);
            fs::create_dir_all(&dir).map_err(|e| WorkspaceError::io(&dir, e))?;
        }
        fs::create_dir_all(&path).map_err(|e| WorkspaceError::io(&path, e))?;

        tracing::debug!(
            session_id = %session_id,
            path = %path.display(),
            "Ensured workspace directory"
        );

        Ok(path)
    }

    /// Materialize `files` into the workspace at `path`.
    ///
    /// Files are written only when their content differs from disk, so
    /// unchanged files keep their modification time. Each asset folder is then
    /// reconciled: any file on disk whose relative path is absent from `files`
    /// is deleted. Root content files are never deleted, and paths outside the
    /// layout are never touched.
    pub fn apply_file_set(&self, path: &Path, files: &FileSet) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut keep: HashSet<&str> = HashSet::with_capacity(files.len());

        for rel in files.sorted_paths() {
            if validate_relative_path(rel).is_err() || !self.layout.contains(rel) {
                report.rejected.push(rel.to_string());
                continue;
            }
            keep.insert(rel);
            if let Some(record) = files.get(rel) {
                self.write_record(path, rel, record, &mut report);
            }
        }

        for folder in &self.layout.asset_folders {
            self.reconcile_folder(path, folder, &keep, &mut report);
        }

        if !report.rejected.is_empty() {
            tracing::warn!(
                workspace = %path.display(),
                rejected = ?report.rejected,
                "Ignored paths outside the managed layout"
            );
        }
        tracing::debug!(
            workspace = %path.display(),
            written = report.written.len(),
            unchanged = report.unchanged.len(),
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "Applied file set"
        );

        report
    }

    /// Apply a delta produced by [`crate::diff`] to the workspace at `path`.
    ///
    /// `Modified` writes the content, `Deleted` removes the file (a missing
    /// file counts as deleted). Paths outside the layout are rejected.
    pub fn apply_changes(&self, path: &Path, changes: &[Change]) -> ApplyReport {
        let mut report = ApplyReport::default();

        for change in changes {
            let rel = change.path();
            if validate_relative_path(rel).is_err() || !self.layout.contains(rel) {
                report.rejected.push(rel.to_string());
                continue;
            }
            match change.record() {
                Some(record) => self.write_record(path, rel, &record, &mut report),
                None => {
                    let target = path.join(rel);
                    match fs::remove_file(&target) {
                        Ok(()) => report.deleted.push(rel.to_string()),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                            report.deleted.push(rel.to_string())
                        }
                        Err(e) => report.fail(rel, WorkspaceError::io(&target, e)),
                    }
                }
            }
        }

        report
    }

    /// Read the root content files and all asset folders as a file set.
    ///
    /// Fails with [`WorkspaceError::NotFound`] when the workspace or a
    /// required root file does not exist.
    pub fn snapshot_workspace(&self, path: &Path) -> Result<FileSet> {
        if !path.is_dir() {
            return Err(WorkspaceError::NotFound(path.to_path_buf()));
        }

        let mut files = FileSet::new();

        for root_file in &self.layout.root_files {
            let file_path = path.join(&root_file.path);
            match read_record(&file_path) {
                Ok(record) => {
                    files.insert(root_file.path.clone(), record);
                }
                Err(WorkspaceError::Io { source, .. })
                    if source.kind() == std::io::ErrorKind::NotFound =>
                {
                    if root_file.required {
                        return Err(WorkspaceError::NotFound(file_path));
                    }
                }
                Err(e) => return Err(e),
            }
        }

        for folder in &self.layout.asset_folders {
            for (rel, file_path) in list_folder(path, folder)? {
                files.insert(rel, read_record(&file_path)?);
            }
        }

        Ok(files)
    }

    /// Delete a session's workspace tree. Missing workspaces are a no-op.
    pub fn remove_workspace(&self, session_id: &str) -> Result<()> {
        if !Self::is_valid_session_id(session_id) {
            return Err(WorkspaceError::InvalidSessionId(session_id.to_string()));
        }

        let path = self.workspace_path(session_id);
        if path.exists() {
            fs::remove_dir_all(&path).map_err(|e| WorkspaceError::io(&path, e))?;
            tracing::debug!(
                session_id = %session_id,
                path = %path.display(),
                "Removed workspace directory"
            );
        }
        Ok(())
    }

    /// Lists the session IDs that currently have a workspace directory.
    pub fn list_workspaces(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        let entries = fs::read_dir(&self.root).map_err(|e| WorkspaceError::io(&self.root, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| WorkspaceError::io(&self.root, e))?;
            let is_dir = entry
                .file_type()
                .map_err(|e| WorkspaceError::io(entry.path(), e))?
                .is_dir();
            if is_dir
                && let Some(name) = entry.file_name().to_str()
                && Self::is_valid_session_id(name)
            {
                ids.push(name.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Write one record if its decoded bytes differ from what is on disk.
    fn write_record(&self, root: &Path, rel: &str, record: &FileRecord, report: &mut ApplyReport) {
        let bytes = match record.to_bytes(rel) {
            Ok(b) => b,
            Err(e) => {
                report.fail(rel, e);
                return;
            }
        };

        let target = root.join(rel);
        match fs::read(&target) {
            Ok(existing) if existing == bytes => {
                report.unchanged.push(rel.to_string());
                return;
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                report.fail(rel, WorkspaceError::io(&target, e));
                return;
            }
        }

        if let Some(parent) = target.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            report.fail(rel, WorkspaceError::io(parent, e));
            return;
        }

        match fs::write(&target, &bytes) {
            Ok(()) => report.written.push(rel.to_string()),
            Err(e) => report.fail(rel, WorkspaceError::io(&target, e)),
        }
    }

    /// Delete every file in `folder` whose relative path is not in `keep`.
    fn reconcile_folder(
        &self,
        root: &Path,
        folder: &str,
        keep: &HashSet<&str>,
        report: &mut ApplyReport,
    ) {
        let existing = match list_folder(root, folder) {
            Ok(files) => files,
            Err(e) => {
                report.fail(folder, e);
                return;
            }
        };

        for (rel, file_path) in existing {
            if keep.contains(rel.as_str()) {
                continue;
            }
            match fs::remove_file(&file_path) {
                Ok(()) => report.deleted.push(rel),
                Err(e) => report.fail(rel, WorkspaceError::io(&file_path, e)),
            }
        }

        prune_folder(root, folder, keep, report);
    }
}

/// Remove symlinks not in `keep` from `root/folder`, then directories left
/// empty. The folder itself stays.
fn prune_folder(root: &Path, folder: &str, keep: &HashSet<&str>, report: &mut ApplyReport) {
    let dir = root.join(folder);
    if !dir.is_dir() {
        return;
    }

    let walker = WalkDir::new(&dir)
        .follow_links(false)
        .min_depth(1)
        .contents_first(true);
    for entry in walker.into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if entry.path_is_symlink() {
            let rel = relative_path(root, path);
            if keep.contains(rel.as_str()) {
                continue;
            }
            match fs::remove_file(path) {
                Ok(()) => report.deleted.push(rel),
                Err(e) => report.fail(rel, WorkspaceError::io(path, e)),
            }
        } else if entry.file_type().is_dir() {
            let empty = fs::read_dir(path).is_ok_and(|mut d| d.next().is_none());
            if empty && let Err(e) = fs::remove_dir(path) {
                tracing::debug!(path = %path.display(), error = %e, "Could not prune empty directory");
            }
        }
    }
}

/// `/`-separated path of `path` relative to `root`.
fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Read a file into a record, stamping its modification time.
fn read_record(path: &Path) -> Result<FileRecord> {
    let bytes = fs::read(path).map_err(|e| WorkspaceError::io(path, e))?;
    let mut record = FileRecord::from_bytes(bytes);
    if let Ok(modified) = fs::metadata(path).and_then(|m| m.modified()) {
        record = record.with_modified(DateTime::<Utc>::from(modified));
    }
    Ok(record)
}

/// Enumerate regular files under `root/folder` as `(relative path, absolute path)`.
///
/// A missing folder yields nothing.
fn list_folder(root: &Path, folder: &str) -> Result<Vec<(String, PathBuf)>> {
    let dir = root.join(folder);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    for entry in WalkDir::new(&dir).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.clone());
            WorkspaceError::io(path, std::io::Error::other(e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if !entry.path().starts_with(root) {
            continue;
        }
        out.push((relative_path(root, entry.path()), entry.path().to_path_buf()));
    }
    Ok(out)
}
