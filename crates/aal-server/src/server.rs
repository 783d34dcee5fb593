use std::future::Future;
use std::sync::Arc;

use aal_ledger::AuditLedger;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::handler::AppState;
use crate::router::build_router;

/// HTTP front end over one ledger.
pub struct AalServer {
    config: Arc<ServerConfig>,
    ledger: Arc<AuditLedger>,
}

impl AalServer {
    pub fn new(config: ServerConfig, ledger: Arc<AuditLedger>) -> Self {
        Self {
            config: Arc::new(config),
            ledger,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<AuditLedger> {
        &self.ledger
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(AppState {
            ledger: self.ledger.clone(),
            config: self.config.clone(),
        })
    }

    /// Start the ledger and serve until `shutdown` resolves, then drain
    /// in-flight requests and stop the ledger.
    pub async fn serve<F>(self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.ledger.start().await?;
        let app = self.router();
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!(addr = %self.config.bind_addr, "AAL server listening");

        let served = axum::serve(listener, app).with_graceful_shutdown(shutdown).await;
        info!("HTTP listener closed; stopping ledger");
        self.ledger.stop().await;
        served?;
        Ok(())
    }
}
