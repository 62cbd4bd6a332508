//! The managed layout contract: which paths sync owns and how.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkspaceError};

/// A root content file: only ever created or overwritten by sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootFile {
    /// File name relative to the workspace root.
    pub path: String,
    /// Whether a snapshot must find this file to consider the workspace initialized.
    #[serde(default)]
    pub required: bool,
}

impl RootFile {
    pub fn required(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            required: true,
        }
    }

    pub fn optional(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            required: false,
        }
    }
}

/// How a workspace-relative path is managed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind<'a> {
    /// One of the fixed root content files.
    RootFile,
    /// A file inside an asset folder (authoritative replace).
    Asset { folder: &'a str },
}

/// Fixed contract distinguishing root content files from asset folders.
///
/// Paths matching neither are outside the layout and are never touched by sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedLayout {
    /// Root content files.
    pub root_files: Vec<RootFile>,
    /// Asset folder names (single path segment each).
    pub asset_folders: Vec<String>,
}

impl Default for ManagedLayout {
    /// Landscape repository layout: three configuration documents plus the
    /// two logo folders.
    fn default() -> Self {
        Self {
            root_files: vec![
                RootFile::required("settings.yml"),
                RootFile::required("landscape.yml"),
                RootFile::optional("guide.yml"),
            ],
            asset_folders: vec!["cached_logos".to_string(), "hosted_logos".to_string()],
        }
    }
}

impl ManagedLayout {
    pub fn new(root_files: Vec<RootFile>, asset_folders: Vec<String>) -> Self {
        Self {
            root_files,
            asset_folders,
        }
    }

    /// Check that every configured entry is a usable path.
    pub fn validate(&self) -> Result<()> {
        for file in &self.root_files {
            validate_relative_path(&file.path)?;
        }
        for folder in &self.asset_folders {
            validate_relative_path(folder)?;
            if folder.contains('/') {
                return Err(WorkspaceError::InvalidPath(format!(
                    "asset folder must be a single segment: {folder}"
                )));
            }
        }
        Ok(())
    }

    /// Classify a relative path, returning `None` when it is outside the layout.
    pub fn classify(&self, path: &str) -> Option<PathKind<'_>> {
        if self.root_files.iter().any(|f| f.path == path) {
            return Some(PathKind::RootFile);
        }
        let (head, rest) = path.split_once('/')?;
        if rest.is_empty() {
            return None;
        }
        self.asset_folders
            .iter()
            .find(|f| f.as_str() == head)
            .map(|folder| PathKind::Asset { folder })
    }

    /// Whether the path is managed by sync.
    pub fn contains(&self, path: &str) -> bool {
        self.classify(path).is_some()
    }

    /// Names of the root files a snapshot cannot do without.
    pub fn required_files(&self) -> impl Iterator<Item = &str> {
        self.root_files
            .iter()
            .filter(|f| f.required)
            .map(|f| f.path.as_str())
    }
}

/// Validate a client-supplied workspace-relative path.
///
/// Accepted paths are non-empty, `/`-separated, relative, and contain no
/// empty, `.` or `..` segments and no backslashes.
pub fn validate_relative_path(path: &str) -> Result<()> {
    let invalid = || WorkspaceError::InvalidPath(path.to_string());

    if path.is_empty() || path.starts_with('/') || path.contains('\\') || path.contains('\0') {
        return Err(invalid());
    }
    for segment in path.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(invalid());
        }
    }
    // Windows drive prefixes such as `C:`
    if path.as_bytes().get(1) == Some(&b':') {
        return Err(invalid());
    }
    Ok(())
}
