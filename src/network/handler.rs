//! Main network handler

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::proxy::InterceptProxy;
use crate::Result;

use super::{HttpHandler, SHUTDOWN_TIMEOUT_MS};

/// Accepts page connections and hands them to the interception proxy
pub struct NetworkHandler {
    proxy: Arc<InterceptProxy>,
    listen_port: u16,
    connections: Arc<Semaphore>,
    shutdown_tx: broadcast::Sender<()>,
}

impl NetworkHandler {
    /// Create a new network handler
    ///
    /// # Errors
    ///
    /// Returns error if the routing configuration is invalid
    pub fn new(config: Config) -> Result<Self> {
        let listen_port = config.listen_port;
        let max_connections = config.limits.max_connections;
        let proxy = InterceptProxy::new(Arc::new(config))?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            proxy: Arc::new(proxy),
            listen_port,
            connections: Arc::new(Semaphore::new(max_connections)),
            shutdown_tx,
        })
    }

    /// Sender that stops the handler when signalled
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Bind the configured port and serve until shutdown
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be bound
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.listen_port));
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from `listener` until Ctrl-C or a shutdown signal
    ///
    /// # Errors
    ///
    /// Returns error if the listener fails irrecoverably
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        info!(
            "Listening on {} ({} router, scope {})",
            addr,
            self.proxy.router().name(),
            self.proxy.scope().as_str()
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let Ok(permit) = Arc::clone(&self.connections).try_acquire_owned() else {
                                warn!("Connection limit reached, rejecting {}", peer_addr);
                                drop(stream);
                                continue;
                            };

                            let proxy = Arc::clone(&self.proxy);
                            tasks.spawn(async move {
                                let _permit = permit;
                                if let Err(e) = HttpHandler::handle_connection(stream, proxy).await {
                                    error!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = result {
                        warn!("Connection task failed: {}", e);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received SIGINT, shutting down");
                    break;
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        // Let in-flight connections finish, up to the timeout
        let shutdown_timeout = Duration::from_millis(SHUTDOWN_TIMEOUT_MS);
        let drained = tokio::time::timeout(shutdown_timeout, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    warn!("Task cleanup error: {}", e);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!("Shutdown timeout elapsed, aborting {} connections", tasks.len());
            tasks.abort_all();
        }

        info!("Shutdown complete");
        Ok(())
    }
}
