//! Start command - launches the preview server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Args;
use tokio::net::TcpListener;

use vantage_config::{CommandConfig, VantageConfig};
use vantage_server::{RegistryConfig, Server, ServerConfig, SessionRegistry};
use vantage_supervisor::{CommandSpec, Supervisor, SupervisorConfig};
use vantage_workspace::{ManagedLayout, RootFile, WorkspaceManager};

use super::Context;

/// Arguments for the start command.
///
/// CLI arguments override config file values.
#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind to (overrides config)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Directory holding the per-session workspaces (overrides config)
    #[arg(long)]
    pub workspace_root: Option<PathBuf>,
}

/// Run the start command.
pub async fn run(args: StartArgs, ctx: &Context) -> Result<()> {
    // ── Load configuration ──────────────────────────────────────────────

    let loaded = ctx.load_config()?;
    for warning in &loaded.warnings {
        eprintln!("warning: {}", warning);
    }
    if ctx.verbose {
        for path in loaded.loaded_from() {
            println!("Config: {}", path.display());
        }
    }

    let config = apply_overrides(loaded.config.resolved(), &args);
    config.validate()?;

    // ── Components ──────────────────────────────────────────────────────

    let workspace_cfg = config.workspace();
    let root = workspace_cfg.resolved_root();
    std::fs::create_dir_all(&root)
        .with_context(|| format!("Failed to create workspace root {}", root.display()))?;
    let workspaces = Arc::new(WorkspaceManager::new(&root, layout_from(&config)?));

    let supervisor = Supervisor::new(supervisor_config(&config), workspaces);
    let registry = Arc::new(SessionRegistry::new(supervisor, registry_config(&config)));

    let server_config = server_config(&config)?;
    let addr = server_config.bind_address;
    let server = Server::new(server_config, registry)?;

    // ── Serve ───────────────────────────────────────────────────────────

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    tracing::info!(%addr, root = %root.display(), "Vantage starting");
    println!("Vantage server starting on http://{}", addr);
    println!("Workspaces: {}", root.display());
    println!("Press Ctrl+C to stop");

    server
        .run_with_shutdown(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown requested");
        })
        .await?;

    Ok(())
}

/// Apply CLI overrides on top of a resolved config.
fn apply_overrides(mut config: VantageConfig, args: &StartArgs) -> VantageConfig {
    let mut server = config.server();
    if let Some(port) = args.port {
        server.port = port;
    }
    if let Some(bind) = &args.bind {
        server.bind = bind.clone();
    }
    config.server = Some(server);

    if let Some(root) = &args.workspace_root {
        let mut workspace = config.workspace();
        workspace.root = Some(root.clone());
        config.workspace = Some(workspace);
    }
    config
}

fn layout_from(config: &VantageConfig) -> Result<ManagedLayout> {
    let workspace = config.workspace();
    let root_files = workspace
        .root_files
        .into_iter()
        .map(|f| RootFile {
            path: f.path,
            required: f.required,
        })
        .collect();
    let layout = ManagedLayout::new(root_files, workspace.asset_folders);
    layout.validate().context("Invalid workspace layout")?;
    Ok(layout)
}

fn command_spec(command: CommandConfig) -> CommandSpec {
    let mut spec = CommandSpec::new(command.program).with_args(command.args);
    for (key, value) in command.env {
        spec = spec.with_env(key, value);
    }
    spec
}

fn supervisor_config(config: &VantageConfig) -> SupervisorConfig {
    let jobs = config.jobs();
    SupervisorConfig {
        readiness_timeout: jobs.readiness_timeout(),
        fetch_timeout: jobs.fetch_timeout(),
        port_range: jobs.port_range.start..jobs.port_range.end,
        ready_marker: jobs.ready_marker,
        fetch: command_spec(jobs.fetch),
        preview: command_spec(jobs.preview),
    }
}

fn registry_config(config: &VantageConfig) -> RegistryConfig {
    let session = config.session();
    RegistryConfig::default()
        .with_idle_timeout(session.idle_timeout())
        .with_disconnect_grace(session.disconnect_grace())
        .with_sweep_interval(session.sweep_interval())
        .with_lock_timeout(session.lock_timeout())
        .with_base_path(config.server().proxy_prefix)
}

fn server_config(config: &VantageConfig) -> Result<ServerConfig> {
    let server = config.server();
    let addr: SocketAddr = format!("{}:{}", server.bind, server.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", server.bind, server.port))?;
    Ok(ServerConfig::new()
        .with_bind_address(addr)
        .with_max_body_size(server.max_body_size)
        .with_proxy_prefix(server.proxy_prefix)
        .with_cors_origins(server.cors_origins))
}
