//! Viewer listener
//!
//! Handles the TCP accept loop. Each viewer's write half is registered with
//! the hub; its read half is drained by a small task so a closed peer is
//! noticed even while nothing is being relayed to it.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::Result;
use crate::registry::{RegistryConfig, RelayHub};
use crate::server::config::ServerConfig;

/// Relay server: accepts viewers and owns the hub they are registered in
pub struct RelayServer {
    config: ServerConfig,
    hub: Arc<RelayHub>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl RelayServer {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        Self::with_registry_config(config, RegistryConfig::default())
    }

    /// Create a new server with custom registry configuration
    pub fn with_registry_config(config: ServerConfig, registry_config: RegistryConfig) -> Self {
        Self::with_hub(config, Arc::new(RelayHub::with_config(registry_config)))
    }

    /// Create a server around an existing hub
    pub fn with_hub(config: ServerConfig, hub: Arc<RelayHub>) -> Self {
        let connection_semaphore = if config.max_clients > 0 {
            Some(Arc::new(Semaphore::new(config.max_clients)))
        } else {
            None
        };

        Self {
            config,
            hub,
            connection_semaphore,
        }
    }

    /// Get a reference to the relay hub
    pub fn hub(&self) -> &Arc<RelayHub> {
        &self.hub
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    ///
    /// On shutdown every source and viewer is removed.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_until(listener, shutdown).await
    }

    /// Accept viewers on an already-bound listener
    pub async fn serve_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        tracing::info!(addr = %listener.local_addr()?, "Relay server listening");

        // Spawn liveness task for waiting viewers
        let liveness_handle = self.hub.spawn_liveness_task();

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        };

        liveness_handle.abort();
        self.hub.shutdown().await;

        result
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        // Configure socket
        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(error = %e, "Failed to configure socket");
            return;
        }

        let (read_half, write_half) = socket.into_split();
        let name = self
            .hub
            .register_client(Box::new(write_half), Some(peer_addr))
            .await;

        tokio::spawn(drain_client(
            Arc::clone(&self.hub),
            name,
            read_half,
            permit,
        ));
    }

    fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}

/// Discard whatever a viewer sends and drop it once its side closes
///
/// The connection permit is released when this task ends.
async fn drain_client(
    hub: Arc<RelayHub>,
    name: String,
    mut read_half: OwnedReadHalf,
    _permit: Option<OwnedSemaphorePermit>,
) {
    let mut buf = [0u8; 512];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!(client = %name, "Client closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(client = %name, error = %e, "Client read failed");
                break;
            }
        }
    }
    hub.remove_client(&name).await;
}
