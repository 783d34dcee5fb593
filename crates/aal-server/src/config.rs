use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Exposes `POST /v1/admin/reset`, which wipes in-memory ledger state.
    /// Never enable outside test deployments.
    pub allow_test_reset: bool,
    /// Adds a permissive CORS layer for browser dashboards.
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8470)),
            allow_test_reset: false,
            cors: false,
        }
    }
}
