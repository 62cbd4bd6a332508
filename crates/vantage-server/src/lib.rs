//! HTTP API, realtime channel and preview proxy for Vantage.
//!
//! This crate is the network surface of the preview backend:
//!
//! - A channel at `/ws` that hands each client a session id and streams the
//!   output of its jobs
//! - REST endpoints under `/api/sessions` to upload files, start fetch and
//!   preview jobs, and inspect or tear down sessions
//! - A reverse proxy under the preview prefix that routes page requests to
//!   the session's preview server
//!
//! # Example
//!
//! ```ignore
//! use vantage_server::{RegistryConfig, Server, ServerConfig, SessionRegistry};
//!
//! let registry = Arc::new(SessionRegistry::new(supervisor, RegistryConfig::default()));
//! let server = Server::new(ServerConfig::new(), registry)?;
//! server.run().await?;
//! ```

pub mod config;
pub mod error;
pub mod proxy;
pub mod registry;
pub mod routes;
pub mod session;
pub mod state;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use proxy::{ProxyRouter, SESSION_COOKIE, SESSION_HEADER};
pub use registry::{PreviewInfo, RegistryConfig, SessionRegistry, SweepReport};
pub use session::{RemoteRef, Session, SessionId, SessionSummary};
pub use state::AppState;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// The Vantage HTTP/channel server.
pub struct Server {
    /// Application state.
    state: AppState,
}

impl Server {
    /// Create a new server around a session registry.
    pub fn new(config: ServerConfig, registry: Arc<SessionRegistry>) -> Result<Self> {
        Ok(Self {
            state: AppState::new(config, registry)?,
        })
    }

    /// Create a server from a pre-built application state.
    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        use axum::routing::{any, get};

        let prefix = self.state.config.proxy_prefix.trim_end_matches('/');
        let mut router = Router::new()
            .merge(routes::health_routes())
            .route("/ws", get(routes::ws_handler))
            .nest("/api", self.api_routes())
            // Preview proxy
            .route(prefix, any(routes::proxy_handler))
            .route(&format!("{prefix}/"), any(routes::proxy_handler))
            .route(&format!("{prefix}/{{*rest}}"), any(routes::proxy_handler))
            .layer(DefaultBodyLimit::max(self.state.config.max_body_size));

        if let Some(cors) = self.cors_layer() {
            router = router.layer(cors);
        }

        router
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// API routes.
    fn api_routes(&self) -> Router<AppState> {
        use axum::routing::{delete, get, post};

        Router::new()
            .route("/sessions", get(routes::list_sessions_handler))
            .route(
                "/sessions/{id}",
                get(routes::get_session_handler).delete(routes::delete_session_handler),
            )
            .route("/sessions/{id}/files", get(routes::session_files_handler))
            .route("/sessions/{id}/upload", post(routes::upload_handler))
            .route("/sessions/{id}/fetch", post(routes::fetch_handler))
            .route("/sessions/{id}/preview", post(routes::preview_handler))
            .route("/sessions/{id}/remote", post(routes::set_remote_handler))
            .route(
                "/sessions/{id}/jobs/{kind}",
                delete(routes::kill_job_handler),
            )
    }

    fn cors_layer(&self) -> Option<CorsLayer> {
        let origins = &self.state.config.cors_origins;
        if origins.is_empty() {
            return None;
        }
        if origins.iter().any(|o| o == "*") {
            return Some(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));
        }
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = %o, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        Some(
            CorsLayer::new()
                .allow_origin(parsed)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    }

    /// Run the server on the configured address until the process exits.
    pub async fn run(self) -> Result<()> {
        let addr = self.state.config.bind_address;
        self.run_on(addr).await
    }

    /// Run the server on a specific address (useful for testing).
    pub async fn run_on(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to bind {addr}: {e}")))?;
        self.run_with_shutdown(listener, std::future::pending()).await
    }

    /// Serve on `listener` until `shutdown` resolves, then tear down every
    /// session.
    ///
    /// The idle sweeper runs for as long as the server does.
    pub async fn run_with_shutdown<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::Internal(format!("Failed to read local address: {e}")))?;
        let router = self.router();
        let registry = Arc::clone(&self.state.registry);

        // Closes open channels and stops the sweeper.
        let cancel = self.state.shutdown.clone();
        let sweeper = registry.spawn_sweeper(cancel.clone());
        let signal = {
            let cancel = cancel.clone();
            async move {
                shutdown.await;
                cancel.cancel();
            }
        };

        info!(%addr, "Starting server");
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await;

        cancel.cancel();
        let _ = sweeper.await;
        registry.shutdown().await;
        info!("Server stopped");

        served.map_err(|e| ServerError::Internal(format!("Server error: {e}")))
    }

    /// Get the configured bind address.
    pub fn bind_address(&self) -> SocketAddr {
        self.state.config.bind_address
    }
}
