//! Application state shared across handlers.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::proxy::ProxyRouter;
use crate::registry::SessionRegistry;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,

    /// Every live session.
    pub registry: Arc<SessionRegistry>,

    /// Preview request forwarder.
    pub proxy: Arc<ProxyRouter>,

    /// Cancelled when the server begins shutting down.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create a new application state.
    pub fn new(config: ServerConfig, registry: Arc<SessionRegistry>) -> Result<Self> {
        let proxy = ProxyRouter::new(config.max_body_size)?;
        Ok(Self {
            config: Arc::new(config),
            registry,
            proxy: Arc::new(proxy),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
