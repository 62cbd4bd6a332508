//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use vantage_server::{RegistryConfig, Server, ServerConfig, SessionRegistry};
use vantage_supervisor::{CommandSpec, Supervisor, SupervisorConfig};
use vantage_workspace::{ManagedLayout, WorkspaceManager};

/// Each test server gets its own slice of preview ports.
static NEXT_PORT_BLOCK: AtomicU16 = AtomicU16::new(23000);
const PORT_BLOCK: u16 = 20;

pub type Channel = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A test server that runs in the background.
pub struct TestServer {
    /// The server's address.
    pub addr: SocketAddr,
    /// HTTP client configured for this server.
    pub client: Client,
    /// The registry behind the server.
    pub registry: Arc<SessionRegistry>,
    /// Handle to the server task.
    _handle: JoinHandle<()>,
    /// Workspace root.
    pub temp_dir: TempDir,
}

impl TestServer {
    /// Start a server whose fetch job rewrites `landscape.yml` and whose
    /// preview job only announces readiness.
    pub async fn start() -> Result<Self> {
        Self::start_with(
            CommandSpec::shell("echo fetching; printf L2 > landscape.yml; rm -f guide.yml"),
            CommandSpec::shell("echo \"READY on $VANTAGE_PORT\"; exec sleep 30"),
        )
        .await
    }

    pub async fn start_with(fetch: CommandSpec, preview: CommandSpec) -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let addr = find_available_port().await?;

        let start = NEXT_PORT_BLOCK.fetch_add(PORT_BLOCK, Ordering::SeqCst);
        let workspaces = Arc::new(WorkspaceManager::new(
            temp_dir.path(),
            ManagedLayout::default(),
        ));
        let supervisor = Supervisor::new(
            SupervisorConfig {
                fetch,
                preview,
                ready_marker: "READY".to_string(),
                readiness_timeout: Duration::from_secs(5),
                fetch_timeout: Some(Duration::from_secs(30)),
                port_range: start..start + PORT_BLOCK,
            },
            workspaces,
        );
        let registry = Arc::new(SessionRegistry::new(supervisor, RegistryConfig::default()));

        let config = ServerConfig::new().with_bind_address(addr);
        let server = Server::new(config, Arc::clone(&registry))?;
        let handle = tokio::spawn(async move {
            let _ = server.run_on(addr).await;
        });

        let client = Client::new();
        wait_for_server(&client, addr).await?;

        Ok(Self {
            addr,
            client,
            registry,
            _handle: handle,
            temp_dir,
        })
    }

    /// Get the base URL for the server.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(format!("{}{}", self.base_url(), path))
    }

    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.post(format!("{}{}", self.base_url(), path))
    }

    pub fn delete(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.delete(format!("{}{}", self.base_url(), path))
    }

    /// Open the channel, optionally resuming `session`.
    ///
    /// Returns the socket, the announced session id and the `Set-Cookie` value.
    pub async fn connect(&self, session: Option<&str>) -> Result<(Channel, String, String)> {
        let url = match session {
            Some(id) => format!("ws://{}/ws?session={id}", self.addr),
            None => format!("ws://{}/ws", self.addr),
        };
        let (mut socket, response) = tokio_tungstenite::connect_async(url).await?;
        let cookie = response
            .headers()
            .get("set-cookie")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let hello = next_event(&mut socket).await?;
        anyhow::ensure!(hello["type"] == "id", "first frame was {hello}");
        let id = hello["session_id"]
            .as_str()
            .context("id frame without session_id")?
            .to_string();
        Ok((socket, id, cookie))
    }

    /// Poll the session summary until `check` holds.
    pub async fn wait_for_session<F>(&self, id: &str, check: F) -> Result<Value>
    where
        F: Fn(&Value) -> bool,
    {
        timeout(Duration::from_secs(10), async {
            loop {
                let summary: Value = self
                    .get(&format!("/api/sessions/{id}"))
                    .send()
                    .await?
                    .json()
                    .await?;
                if check(&summary) {
                    return Ok(summary);
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await
        .context("Timeout waiting for session state")?
    }
}

/// Next JSON frame from the channel.
pub async fn next_event(socket: &mut Channel) -> Result<Value> {
    loop {
        let frame = timeout(Duration::from_secs(10), socket.next())
            .await
            .context("Timeout waiting for channel frame")?
            .context("Channel closed")??;
        if let Message::Text(text) = frame {
            return Ok(serde_json::from_str(text.as_str())?);
        }
    }
}

/// Collect frames until one matches `stop` (inclusive).
pub async fn collect_until<F>(socket: &mut Channel, stop: F) -> Result<Vec<Value>>
where
    F: Fn(&Value) -> bool,
{
    let mut events = Vec::new();
    loop {
        let event = next_event(socket).await?;
        let done = stop(&event);
        events.push(event);
        if done {
            return Ok(events);
        }
    }
}

pub async fn send_text(socket: &mut Channel, text: &str) -> Result<()> {
    socket.send(Message::Text(text.into())).await?;
    Ok(())
}

/// Find an available port for the test server.
async fn find_available_port() -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr)
}

/// Wait for the server to become ready.
async fn wait_for_server(client: &Client, addr: SocketAddr) -> Result<()> {
    let url = format!("http://{}/health", addr);

    let result = timeout(Duration::from_secs(5), async {
        loop {
            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return,
                _ => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
    })
    .await;

    match result {
        Ok(()) => Ok(()),
        Err(_) => anyhow::bail!("Timeout waiting for server to start"),
    }
}
