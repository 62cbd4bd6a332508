//! Status command - queries a running server.

use anyhow::{Context as _, Result};
use clap::Args;
use serde_json::Value;

use super::Context;

/// Arguments for the status command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Also list every live session
    #[arg(short, long)]
    pub sessions: bool,
}

/// Run the status command.
pub async fn run(args: StatusArgs, ctx: &Context) -> Result<()> {
    let client = reqwest::Client::new();
    let base = ctx.server_url.trim_end_matches('/');

    let health: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .with_context(|| format!("Server not reachable at {base}"))?
        .error_for_status()?
        .json()
        .await?;

    let sessions: Option<Value> = if args.sessions {
        Some(
            client
                .get(format!("{base}/api/sessions"))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?,
        )
    } else {
        None
    };

    if ctx.json_output {
        let out = serde_json::json!({ "health": health, "sessions": sessions });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!(
        "Vantage {} at {}: {} ({} session(s))",
        health["version"].as_str().unwrap_or("?"),
        base,
        health["status"].as_str().unwrap_or("unknown"),
        health["sessions"]
    );

    if let Some(list) = sessions.as_ref().and_then(|s| s["sessions"].as_array()) {
        for session in list {
            println!(
                "  {}  connected={}  preview={}  fetch={}  idle={}s",
                session["id"].as_str().unwrap_or("?"),
                session["connected"],
                session["preview"].as_str().unwrap_or("-"),
                session["fetch"].as_str().unwrap_or("-"),
                session["idle_secs"],
            );
        }
    }
    Ok(())
}
