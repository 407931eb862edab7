//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::handler::{AppState, StaticHandler, handle};
use super::reconcile::LiveState;
use crate::auth::{Authenticator, StaticAuthenticator};
use crate::config::{Config, ServiceConfig};
use crate::pricer::{Pricer, RemotePricer};
use crate::{Error, Result};

/// Tollgate server: owns the live gateway state and the HTTP listener.
pub struct Gateway {
    config: Config,
    state: Arc<AppState>,
}

impl Gateway {
    /// Create a new gateway from configuration, wiring up the built-in
    /// collaborators. Fails if any service pattern or backend certificate
    /// is invalid.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let authenticator: Arc<dyn Authenticator> =
            Arc::new(StaticAuthenticator::new(config.authenticator.token.clone()));

        let pricer: Option<Arc<dyn Pricer>> = if config.pricer.url.is_empty() {
            None
        } else {
            Some(Arc::new(RemotePricer::new(&config.pricer.url)?))
        };

        let state = Arc::new(AppState {
            live: LiveState::from_configs(&config.services)?,
            authenticator,
            pricer,
            static_handler: StaticHandler::from_config(&config.static_files),
            grpc_error_status: config.server.grpc_error_status,
        });

        Ok(Self { config, state })
    }

    /// Shared application state, for tests and embedding.
    #[must_use]
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Re-configure the gateway to use a new set of backend services.
    /// In-flight requests complete on the snapshot they started with.
    pub fn reconcile(&self, services: &[ServiceConfig]) -> Result<()> {
        self.state.live.reconcile(services)
    }

    /// Run the gateway until a shutdown signal arrives.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = Router::new()
            .fallback(handle)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state);

        let listener = TcpListener::bind(addr).await?;

        info!(
            version = env!("CARGO_PKG_VERSION"),
            host = %self.config.server.host,
            port = self.config.server.port,
            services = self.config.services.len(),
            "Tollgate listening"
        );
        for service in &self.config.services {
            info!(
                name = %service.name,
                target = %format!("{}://{}", service.protocol, service.address),
                auth = %service.auth,
                "Routing service"
            );
        }
        if self.config.static_files.enabled {
            info!(root = %self.config.static_files.root, "Static fallback enabled");
        }
        if self.config.authenticator.token.is_empty() {
            warn!("Authenticator token is empty - every paid request will be challenged");
        }

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
