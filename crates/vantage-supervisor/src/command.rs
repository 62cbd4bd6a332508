//! Command templates and their expansion into tokio commands.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// An external command with `{placeholder}` substitution in its arguments
/// and environment values.
///
/// Recognized placeholders: `{workspace}`, `{port}`, `{session}`,
/// `{base_path}`. Unknown placeholders are left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// A `sh -c <script>` command.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").with_args(["-c".to_string(), script.into()])
    }

    /// Expand the template into a ready-to-spawn command.
    ///
    /// Output is piped, stdin is closed, the working directory is the session
    /// workspace and the child is killed if the command is dropped.
    pub(crate) fn build(&self, ctx: &JobContext, port: Option<u16>) -> Command {
        let render = |s: &str| render(s, ctx, port);

        let mut cmd = Command::new(&self.program);
        cmd.args(self.args.iter().map(|a| render(a)))
            .current_dir(&ctx.workspace)
            .env("VANTAGE_SESSION_ID", &ctx.session_id)
            .env("VANTAGE_WORKSPACE", &ctx.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(port) = port {
            cmd.env("VANTAGE_PORT", port.to_string());
        }
        for (key, value) in ctx.env.iter().chain(self.env.iter()) {
            cmd.env(key, render(value));
        }
        cmd
    }
}

/// Per-invocation values a job runs with.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub session_id: String,
    /// Session workspace directory, used as the working directory.
    pub workspace: PathBuf,
    /// URL prefix under which the preview is proxied, e.g. `/preview`.
    pub base_path: String,
    /// Extra environment, applied before the command's own `env`.
    pub env: BTreeMap<String, String>,
}

impl JobContext {
    pub fn new(session_id: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            session_id: session_id.into(),
            workspace: workspace.into(),
            base_path: String::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

fn render(template: &str, ctx: &JobContext, port: Option<u16>) -> String {
    let mut out = template
        .replace("{workspace}", &ctx.workspace.to_string_lossy())
        .replace("{session}", &ctx.session_id)
        .replace("{base_path}", &ctx.base_path);
    if let Some(port) = port {
        out = out.replace("{port}", &port.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> JobContext {
        JobContext::new("abc", "/tmp/vantage/abc").with_base_path("/preview")
    }

    #[test]
    fn test_render_placeholders() {
        assert_eq!(
            render("--port={port} --base={base_path}", &ctx(), Some(4100)),
            "--port=4100 --base=/preview"
        );
        assert_eq!(render("{workspace}/dist", &ctx(), None), "/tmp/vantage/abc/dist");
        assert_eq!(render("{session}", &ctx(), None), "abc");
    }

    #[test]
    fn test_port_placeholder_kept_without_port() {
        assert_eq!(render("{port}", &ctx(), None), "{port}");
        assert_eq!(render("{unknown}", &ctx(), Some(1)), "{unknown}");
    }

    #[test]
    fn test_deserialize_defaults() {
        let spec: CommandSpec = serde_json::from_str(r#"{ "program": "landscape2" }"#).unwrap();
        assert_eq!(spec, CommandSpec::new("landscape2"));
    }

    #[tokio::test]
    async fn test_built_command_sees_environment() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = JobContext::new("s1", dir.path()).with_env("VANTAGE_PREVIEW_REF", "main");
        let spec = CommandSpec::shell("echo $VANTAGE_SESSION_ID $VANTAGE_PORT $VANTAGE_PREVIEW_REF $EXTRA; pwd")
            .with_env("EXTRA", "{port}");

        let output = spec.build(&ctx, Some(4242)).output().await.unwrap();
        let stdout = String::from_utf8(output.stdout).unwrap();
        let mut lines = stdout.lines();

        assert_eq!(lines.next(), Some("s1 4242 main 4242"));
        let pwd = std::path::PathBuf::from(lines.next().unwrap());
        assert_eq!(
            pwd.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }
}
