//! WebSocket accept loop

use crate::handler::handle_connection;
use crate::Result;
use matchpoint_core::Coordinator;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Listens for WebSocket connections and hands each one to the coordinator
pub struct WebSocketServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    coordinator: Arc<Coordinator>,
}

impl WebSocketServer {
    /// Bind the listener; use port 0 to pick a free port
    pub async fn bind(addr: SocketAddr, coordinator: Arc<Coordinator>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("WebSocket server listening on ws://{}", local_addr);
        Ok(Self {
            listener,
            local_addr,
            coordinator,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until the process exits
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves, then close every
    /// session through the coordinator
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "Accepted connection");
                        let _ = stream.set_nodelay(true);
                        let coordinator = Arc::clone(&self.coordinator);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, coordinator).await {
                                debug!(peer = %peer, error = %e, "Connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                _ = &mut shutdown => {
                    info!("Shutdown requested, closing sessions");
                    break;
                }
            }
        }

        self.coordinator.shutdown().await;
        info!("WebSocket server stopped");
        Ok(())
    }
}
