//! HTTP transport adapter with deferred startup.
//!
//! `new()` records the configuration, `start()` binds the TCP listener, and
//! `serve()` accepts connections. The listener is bound before the server
//! finishes warmup, but nothing is accepted until the server is `Ready`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context as _;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{
    dispatch_handler, health_handler, liveness_handler, readiness_handler, AppState,
};
use super::lifecycle::LifecycleState;
use super::middleware::build_http_layers;
use crate::protocol::Http;
use crate::service::Server;

/// Serves a [`Server<Http>`] over HTTP/1.1 with axum.
///
/// Follows the deferred startup pattern:
/// 1. `new()` -- stores the configuration
/// 2. `start()` -- binds the TCP listener to the configured address
/// 3. `serve()` -- accepts connections until the shutdown future resolves,
///    then shuts the server down
pub struct HttpTransport {
    config: NetworkConfig,
    listener: Option<TcpListener>,
}

impl HttpTransport {
    #[must_use]
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            listener: None,
        }
    }

    /// Assembles the axum router.
    ///
    /// Routes:
    /// - `GET /health` -- lifecycle state as JSON
    /// - `GET /health/live` -- liveness probe
    /// - `GET /health/ready` -- readiness probe
    /// - everything else -- dispatched through `Server::handle`
    pub fn router(server: Arc<Server<Http>>, config: &NetworkConfig) -> Router {
        let state = AppState {
            server,
            config: Arc::new(config.clone()),
            start_time: Instant::now(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .fallback(dispatch_handler)
            .layer(build_http_layers(config))
            .with_state(state)
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which differs from the configured port
    /// when port 0 is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// The bound address, once `start()` succeeded.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// Serves connections until `shutdown` resolves, then shuts `server`
    /// down, draining in-flight dispatches for up to its configured drain
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called, if `server` is not
    /// `Ready`, on a fatal I/O error, or if the server shutdown fails.
    pub async fn serve(
        self,
        server: Arc<Server<Http>>,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .context("start() must be called before serve()")?;
        let state = server.state();
        if state != LifecycleState::Ready {
            anyhow::bail!("refusing to serve: server is {state}, not ready");
        }

        let router = Self::router(Arc::clone(&server), &self.config);
        info!(server = %server.config().name, "serving HTTP connections");

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await;
        if let Err(e) = &served {
            warn!(error = %e, "HTTP server stopped with an error");
        }

        let drained = server.shutdown(server.config().drain_timeout).await?;
        if !drained {
            warn!("server stopped before all in-flight requests completed");
        }
        served?;
        Ok(())
    }
}
