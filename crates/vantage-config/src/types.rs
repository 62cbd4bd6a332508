//! Configuration types.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Environment variable overriding the workspace root.
pub const WORKSPACE_ROOT_ENV: &str = "VANTAGE_WORKSPACE_ROOT";

/// Root configuration.
///
/// All sections are optional so partial configs (e.g. project-local
/// overrides) can be loaded and merged. Accessors fall back to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VantageConfig {
    pub server: Option<ServerConfig>,
    pub workspace: Option<WorkspaceConfig>,
    pub jobs: Option<JobsConfig>,
    pub session: Option<SessionConfig>,
}

impl VantageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Merging is per section: a section present in `other` replaces ours.
    pub fn merge(&mut self, other: VantageConfig) {
        if other.server.is_some() {
            self.server = other.server;
        }
        if other.workspace.is_some() {
            self.workspace = other.workspace;
        }
        if other.jobs.is_some() {
            self.jobs = other.jobs;
        }
        if other.session.is_some() {
            self.session = other.session;
        }
    }

    /// Fill every missing section with its defaults.
    pub fn resolved(&self) -> Self {
        Self {
            server: Some(self.server()),
            workspace: Some(self.workspace()),
            jobs: Some(self.jobs()),
            session: Some(self.session()),
        }
    }

    pub fn server(&self) -> ServerConfig {
        self.server.clone().unwrap_or_default()
    }

    pub fn workspace(&self) -> WorkspaceConfig {
        self.workspace.clone().unwrap_or_default()
    }

    pub fn jobs(&self) -> JobsConfig {
        self.jobs.clone().unwrap_or_default()
    }

    pub fn session(&self) -> SessionConfig {
        self.session.clone().unwrap_or_default()
    }

    /// Check values that would only fail later at runtime.
    pub fn validate(&self) -> Result<()> {
        let server = self.server();
        if !server.proxy_prefix.starts_with('/') || server.proxy_prefix.len() < 2 {
            return Err(ConfigError::invalid(
                "server.proxy_prefix",
                "must start with '/' and not be the root",
            ));
        }
        if server.proxy_prefix.ends_with('/') {
            return Err(ConfigError::invalid(
                "server.proxy_prefix",
                "must not end with '/'",
            ));
        }
        if server.proxy_prefix.starts_with("/api") || server.proxy_prefix == "/ws" {
            return Err(ConfigError::invalid(
                "server.proxy_prefix",
                "collides with a built-in route",
            ));
        }

        let workspace = self.workspace();
        if let Some(file) = workspace.root_files.iter().find(|f| !is_plain_relative(&f.path)) {
            return Err(ConfigError::invalid(
                "workspace.root_files",
                format!("'{}' is not a plain relative path", file.path),
            ));
        }
        if let Some(folder) = workspace
            .asset_folders
            .iter()
            .find(|f| !is_plain_relative(f) || f.contains('/'))
        {
            return Err(ConfigError::invalid(
                "workspace.asset_folders",
                format!("'{folder}' must be a single directory name"),
            ));
        }

        let jobs = self.jobs();
        if jobs.port_range.start >= jobs.port_range.end {
            return Err(ConfigError::invalid(
                "jobs.port_range",
                format!(
                    "start ({}) must be below end ({})",
                    jobs.port_range.start, jobs.port_range.end
                ),
            ));
        }
        if jobs.ready_marker.is_empty() {
            return Err(ConfigError::invalid("jobs.ready_marker", "must not be empty"));
        }
        if jobs.readiness_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "jobs.readiness_timeout_secs",
                "must be positive",
            ));
        }

        if self.session().sweep_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "session.sweep_interval_secs",
                "must be positive",
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind: String,
    /// Port to listen on.
    pub port: u16,
    /// Maximum request body size in bytes (uploads and proxied requests).
    pub max_body_size: usize,
    /// URL prefix routed to session preview servers.
    pub proxy_prefix: String,
    /// Origins allowed by CORS. Empty disables CORS; `"*"` allows any.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
            max_body_size: 32 * 1024 * 1024,
            proxy_prefix: "/preview".to_string(),
            cors_origins: Vec::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Workspace
// ─────────────────────────────────────────────────────────────────────────────

/// A root content file of the managed layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootFileConfig {
    pub path: String,
    #[serde(default)]
    pub required: bool,
}

/// Workspace storage and layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Directory holding one workspace per session.
    pub root: Option<PathBuf>,
    /// Root content files (created/overwritten, never deleted by sync).
    pub root_files: Vec<RootFileConfig>,
    /// Asset folders (authoritative replace).
    pub asset_folders: Vec<String>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        let root_file = |path: &str, required| RootFileConfig {
            path: path.to_string(),
            required,
        };
        Self {
            root: None,
            root_files: vec![
                root_file("settings.yml", true),
                root_file("landscape.yml", true),
                root_file("guide.yml", false),
            ],
            asset_folders: vec!["cached_logos".to_string(), "hosted_logos".to_string()],
        }
    }
}

impl WorkspaceConfig {
    /// The effective workspace root.
    ///
    /// `VANTAGE_WORKSPACE_ROOT` wins over the configured value, which wins
    /// over `<tmp>/vantage`.
    pub fn resolved_root(&self) -> PathBuf {
        if let Ok(dir) = std::env::var(WORKSPACE_ROOT_ENV)
            && !dir.is_empty()
        {
            return PathBuf::from(dir);
        }
        self.root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("vantage"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Jobs
// ─────────────────────────────────────────────────────────────────────────────

/// An external command template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandConfig {
    fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: BTreeMap::new(),
        }
    }
}

/// Inclusive start, exclusive end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

/// Fetch and preview job configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub fetch: CommandConfig,
    pub preview: CommandConfig,
    /// Substring of the preview's stdout that signals readiness.
    pub ready_marker: String,
    pub readiness_timeout_secs: u64,
    /// Zero disables the fetch deadline.
    pub fetch_timeout_secs: u64,
    pub port_range: PortRange,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            fetch: CommandConfig::new(
                "landscape2",
                &[
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
                ],
            ),
            preview: CommandConfig::new(
                "landscape2",
                &[
                    "serve",
                    "--landscape-dir",
                    "build",
                    "--addr",
                    "127.0.0.1:{port}",
                ],
            ),
            ready_marker: "listening".to_string(),
            readiness_timeout_secs: 60,
            fetch_timeout_secs: 900,
            port_range: PortRange {
                start: 4100,
                end: 4300,
            },
        }
    }
}

impl JobsConfig {
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        (self.fetch_timeout_secs > 0).then(|| Duration::from_secs(self.fetch_timeout_secs))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Session lifecycle configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions idle for longer than this are reclaimed.
    pub idle_timeout_secs: u64,
    /// Minimum time a disconnected session is kept for reconnects.
    pub disconnect_grace_secs: u64,
    /// Interval of the reclamation sweep.
    pub sweep_interval_secs: u64,
    /// How long a request waits for the per-session lock.
    pub lock_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 1800,
            disconnect_grace_secs: 120,
            sweep_interval_secs: 60,
            lock_timeout_secs: 30,
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_secs(self.disconnect_grace_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

/// Non-empty, `/`-separated, relative, without `.`/`..` or empty segments.
fn is_plain_relative(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && path.split('/').all(|s| !s.is_empty() && s != "." && s != "..")
}
