//! API Server
//!
//! Serves the REST API for a single storage driver.

use crate::domain::ports::StorageDriverRef;
use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info};

use super::rest::RestRouter;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// REST API bind address
    pub rest_addr: SocketAddr,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            rest_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
            request_timeout_secs: 300,
        }
    }
}

// =============================================================================
// API Server
// =============================================================================

/// REST API server in front of a storage driver
pub struct ApiServer {
    config: ApiServerConfig,
    driver: StorageDriverRef,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(config: ApiServerConfig, driver: StorageDriverRef) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            driver,
            shutdown_tx,
        }
    }

    /// Run the API server until shutdown
    pub async fn run(&self) -> Result<()> {
        info!("Starting API server for backend {}", self.driver.backend_name());
        info!("  REST API: {}", self.config.rest_addr);

        let rest_handle = self.spawn_rest_server();

        match rest_handle.await {
            Ok(result) => result,
            Err(e) => {
                error!("REST server task failed: {:?}", e);
                Err(Error::Internal(format!("REST server task failed: {}", e)))
            }
        }
    }

    fn spawn_rest_server(&self) -> tokio::task::JoinHandle<Result<()>> {
        let addr = self.config.rest_addr;
        let timeout = Duration::from_secs(self.config.request_timeout_secs);
        let driver = self.driver.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move { run_rest_server(addr, timeout, driver, shutdown_rx).await })
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Receiver that fires on shutdown, for servers running alongside the API
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}

/// Run the REST API server
async fn run_rest_server(
    addr: SocketAddr,
    timeout: Duration,
    driver: StorageDriverRef,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let app = RestRouter::new(driver)
        .build()
        .layer(ServiceBuilder::new().layer(TimeoutLayer::new(timeout)));

    info!("REST API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind REST server: {}", e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("REST server shutting down");
        })
        .await
        .map_err(|e| Error::Internal(format!("REST server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ApiServerConfig::default();
        assert_eq!(config.rest_addr.port(), 8090);
        assert!(config.rest_addr.ip().is_unspecified());
        assert_eq!(config.request_timeout_secs, 300);
    }
}
