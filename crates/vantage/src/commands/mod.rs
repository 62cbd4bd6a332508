//! CLI command handlers.

use std::path::PathBuf;

use anyhow::Result;
use vantage_config::{ConfigSource, LoadedConfig};

pub mod config;
pub mod start;
pub mod status;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Server URL client commands talk to.
    pub server_url: String,
    /// Explicit config file, bypassing discovery.
    pub config_path: Option<PathBuf>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Load the explicit config file if one was given, otherwise discover
    /// and merge the config layers.
    pub fn load_config(&self) -> Result<LoadedConfig> {
        match &self.config_path {
            Some(path) => {
                let config = vantage_config::load_config_file(path)?;
                Ok(LoadedConfig {
                    config,
                    sources: vec![ConfigSource {
                        path: path.clone(),
                        loaded: true,
                    }],
                    warnings: Vec::new(),
                })
            }
            None => Ok(vantage_config::load_config(None)?),
        }
    }
}
