//! Gateway server

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::handler::{AppState, create_router};
use crate::config::Config;
use crate::oidc::KeySetDocument;
use crate::{Error, Result};

/// OIDC gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Request-handling state
    state: Arc<AppState>,
}

impl Gateway {
    /// Create a new gateway from a validated configuration
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when the configuration is invalid, [`Error::Http`]
    /// when an HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let state = Arc::new(AppState::from_config(&config)?);
        Ok(Self { config, state })
    }

    /// Configuration the gateway was built from
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Router serving every request through the gateway dispatcher
    #[must_use]
    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }

    /// Fetch and parse the issuer's key set once, returning the number of
    /// keys published.
    ///
    /// # Errors
    ///
    /// [`Error::Oidc`] when discovery, download or parsing fails.
    pub async fn probe_issuer(&self) -> Result<usize> {
        let bytes = self.state.key_sets.get(&self.state.issuer).await?;
        Ok(KeySetDocument::from_slice(&bytes)?.keys.len())
    }

    /// Bind the configured address and serve until SIGINT/SIGTERM
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for an unparseable host, [`Error::Io`] when the
    /// address cannot be bound.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("OIDC Gateway listening on {addr}");
        info!("  Issuer:      {}", self.config.oidc.issuer);
        info!("  Token header: {}", self.config.oidc.auth_header);
        info!("  Repository:  {}", self.config.policy.repository);
        info!("  Audience:    {}", self.config.policy.audience);
        info!("  Key set TTL: {:?}", self.config.oidc.key_set_ttl);
        info!("  Dial timeout: {:?}", self.config.tunnel.dial_timeout);
        if self.config.passthrough.enabled {
            info!("  Passthrough: GET {} -> {}", self.config.passthrough.path, self.config.passthrough.upstream_url);
        }
        info!("============================================================");

        // Warm the key-set cache; requests retry on their own if this fails
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            match state.key_sets.get(&state.issuer).await {
                Ok(bytes) => info!(size = bytes.len(), "Key set pre-fetched"),
                Err(e) => warn!(error = %e, "Key set pre-fetch failed"),
            }
        });

        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already-bound listener until `shutdown` resolves.
    ///
    /// Established tunnels are detached from the HTTP connection and are not
    /// waited for.
    ///
    /// # Errors
    ///
    /// [`Error::Internal`] when the accept loop fails.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();

        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Gateway stopped accepting connections");
        Ok(())
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
