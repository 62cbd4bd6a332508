//! Configuration system for the Vantage preview server.
//!
//! Provides TOML-based configuration with:
//! - `[server]`: listen address, body limit, proxy prefix
//! - `[workspace]`: workspace root and the managed layout
//! - `[jobs]`: fetch and preview commands, readiness marker, timeouts, port range
//! - `[session]`: idle reclamation and locking timeouts
//!
//! Config files are layered (user config, then project-local `vantage.toml`);
//! CLI flags are applied on top by the binary.

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config, load_config_file, load_config_with_options, xdg_config_dir,
    xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
