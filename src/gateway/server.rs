//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::router::{AppState, create_router};
use crate::cache::TtlCache;
use crate::config::Config;
use crate::crm::CrmClient;
use crate::failsafe::ClientRateLimiter;
use crate::units::UnitsService;
use crate::{Error, Result};

/// Units gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Shared application state
    state: Arc<AppState>,
}

impl Gateway {
    /// Create a new gateway
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        let missing = config.crm.missing_credentials();
        if !missing.is_empty() {
            warn!(
                missing = %missing.join(", "),
                "CRM credentials incomplete; API requests will fail until configured"
            );
        }

        let client = CrmClient::new(&config.crm)?;
        let units = UnitsService::new(
            Arc::new(client),
            Arc::new(TtlCache::new()),
            &config.cache,
            config.crm.api_version.clone(),
        );
        let state = Arc::new(AppState {
            units: Arc::new(units),
            rate_limiter: Arc::new(ClientRateLimiter::new(&config.rate_limit)),
        });

        Ok(Self { config, state })
    }

    /// Run the gateway until a shutdown signal arrives
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or the listener fails.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = create_router(Arc::clone(&self.state));
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("UNITS GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(login_url = %self.config.crm.login_url, api_version = %self.config.crm.api_version, "CRM backend");
        info!(
            ttl_secs = self.config.cache.default_ttl().as_secs(),
            describe_ttl_secs = self.config.cache.describe_ttl().as_secs(),
            "Cache"
        );
        if self.state.rate_limiter.is_enabled() {
            info!(
                requests_per_minute = self.config.rate_limit.requests_per_minute,
                "RATE LIMIT enabled per client address"
            );
        } else {
            warn!("RATE LIMIT disabled");
        }
        info!("============================================================");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

        let stats = self.state.units.cache().stats();
        info!(
            hits = stats.hits,
            misses = stats.misses,
            stale_hits = stats.stale_hits,
            hit_rate = stats.hit_rate,
            "Gateway stopped"
        );
        Ok(())
    }
}

/// Resolve on Ctrl-C or SIGTERM.
///
/// A handler that fails to install is logged and never fires.
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
            Ok(mut stream) => {
                stream.recv().await;
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
