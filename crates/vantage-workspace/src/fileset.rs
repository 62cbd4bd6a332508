//! File-set model shared by upload, snapshot and diff.

use std::collections::HashMap;
use std::collections::hash_map;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkspaceError};

/// How a [`FileRecord`]'s content is encoded on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Content is the file's UTF-8 text.
    #[default]
    Utf8,
    /// Content is the file's raw bytes, base64 encoded.
    Base64,
}

/// One file's content at one instant.
///
/// The path is the key of the owning [`FileSet`]. Records deserialize either
/// from a full object or from a bare string (UTF-8 text shorthand):
///
/// ```json
/// { "settings.yml": "title: x", "cached_logos/a.png": { "content": "iVBOR...", "encoding": "base64" } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawRecord")]
pub struct FileRecord {
    /// Text or base64 payload.
    pub content: String,
    /// Encoding of `content`.
    pub encoding: Encoding,
    /// Last-modified time, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRecord {
    Text(String),
    Full {
        content: String,
        #[serde(default)]
        encoding: Encoding,
        #[serde(default)]
        modified: Option<DateTime<Utc>>,
    },
}

impl From<RawRecord> for FileRecord {
    fn from(raw: RawRecord) -> Self {
        match raw {
            RawRecord::Text(content) => Self::text(content),
            RawRecord::Full {
                content,
                encoding,
                modified,
            } => Self {
                content,
                encoding,
                modified,
            },
        }
    }
}

impl FileRecord {
    /// A UTF-8 text record.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            encoding: Encoding::Utf8,
            modified: None,
        }
    }

    /// A binary record, stored base64 encoded.
    pub fn binary(bytes: &[u8]) -> Self {
        Self {
            content: BASE64.encode(bytes),
            encoding: Encoding::Base64,
            modified: None,
        }
    }

    /// Build a record from raw file bytes, preferring text when the bytes are
    /// valid UTF-8.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => Self::text(text),
            Err(e) => Self::binary(e.as_bytes()),
        }
    }

    /// Attach a modification time.
    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }

    /// Decode the record into the bytes that belong on disk.
    ///
    /// `path` is only used for error reporting.
    pub fn to_bytes(&self, path: &str) -> Result<Vec<u8>> {
        match self.encoding {
            Encoding::Utf8 => Ok(self.content.as_bytes().to_vec()),
            Encoding::Base64 => {
                BASE64
                    .decode(self.content.as_bytes())
                    .map_err(|source| WorkspaceError::Decode {
                        path: path.to_string(),
                        source,
                    })
            }
        }
    }

    /// Exact content equality. Timestamps are ignored.
    pub fn same_content(&self, other: &FileRecord) -> bool {
        self.encoding == other.encoding && self.content == other.content
    }
}

/// Mapping from slash-separated workspace-relative path to [`FileRecord`].
///
/// Keys are unique and carry no ordering semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileSet {
    files: HashMap<String, FileRecord>,
}

impl FileSet {
    /// Create an empty file set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record, returning the previous one.
    pub fn insert(&mut self, path: impl Into<String>, record: FileRecord) -> Option<FileRecord> {
        self.files.insert(path.into(), record)
    }

    /// Builder-style insert of a UTF-8 text record.
    pub fn with_text(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.insert(path, FileRecord::text(content));
        self
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.files.get(path)
    }

    pub fn remove(&mut self, path: &str) -> Option<FileRecord> {
        self.files.remove(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Iterate over `(path, record)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FileRecord)> {
        self.files.iter().map(|(p, r)| (p.as_str(), r))
    }

    /// All paths, sorted. Useful for deterministic processing and logging.
    pub fn sorted_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.files.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }
}

impl FromIterator<(String, FileRecord)> for FileSet {
    fn from_iter<I: IntoIterator<Item = (String, FileRecord)>>(iter: I) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for FileSet {
    type Item = (String, FileRecord);
    type IntoIter = hash_map::IntoIter<String, FileRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.into_iter()
    }
}

/// A single entry of the delta between two file sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Change {
    /// The path was added or its content changed.
    Modified {
        path: String,
        content: String,
        #[serde(default)]
        encoding: Encoding,
    },
    /// The path no longer exists.
    Deleted { path: String },
}

impl Change {
    /// Create a `Modified` change from a record.
    pub fn modified(path: impl Into<String>, record: &FileRecord) -> Self {
        Self::Modified {
            path: path.into(),
            content: record.content.clone(),
            encoding: record.encoding,
        }
    }

    /// Create a `Deleted` change.
    pub fn deleted(path: impl Into<String>) -> Self {
        Self::Deleted { path: path.into() }
    }

    /// The path this change concerns.
    pub fn path(&self) -> &str {
        match self {
            Self::Modified { path, .. } | Self::Deleted { path } => path,
        }
    }

    /// The record a `Modified` change would write, `None` for deletions.
    pub fn record(&self) -> Option<FileRecord> {
        match self {
            Self::Modified {
                content, encoding, ..
            } => Some(FileRecord {
                content: content.clone(),
                encoding: *encoding,
                modified: None,
            }),
            Self::Deleted { .. } => None,
        }
    }
}
