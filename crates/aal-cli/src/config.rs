use std::path::Path;

use aal_ledger::LedgerConfig;
use aal_server::ServerConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Contents of an `aal.toml` file: a `[server]` and a `[ledger]` section,
/// either of which may be omitted.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub ledger: LedgerConfig,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        config
            .ledger
            .validate()
            .with_context(|| format!("invalid ledger settings in {}", path.display()))?;
        Ok(config)
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("serializing configuration")
    }
}
