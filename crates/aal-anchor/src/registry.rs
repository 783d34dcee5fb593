use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::AnchorBackend;
use crate::config::DispatcherConfig;
use crate::error::AnchorError;
use crate::http::HttpBackend;
use crate::local_chain::LocalChainBackend;

/// One configured backend, in priority order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub kind: BackendKind,
}

fn default_enabled() -> bool {
    true
}

fn default_http_timeout_ms() -> u64 {
    10_000
}

/// Backend variants, tagged by `type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendKind {
    LocalChain {
        path: PathBuf,
    },
    Http {
        endpoint: String,
        #[serde(default = "default_http_timeout_ms")]
        timeout_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth_token: Option<String>,
    },
    /// Built by a factory registered with [`BackendRegistry::register`].
    Custom {
        factory: String,
        #[serde(default)]
        options: BTreeMap<String, String>,
    },
}

impl BackendConfig {
    pub fn local_chain(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            kind: BackendKind::LocalChain { path: path.into() },
        }
    }

    pub fn http(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            kind: BackendKind::Http {
                endpoint: endpoint.into(),
                timeout_ms: default_http_timeout_ms(),
                auth_token: None,
            },
        }
    }

    pub fn custom(id: impl Into<String>, factory: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            kind: BackendKind::Custom {
                factory: factory.into(),
                options: BTreeMap::new(),
            },
        }
    }
}

/// Constructor for a custom backend kind.
pub type BackendFactory =
    Arc<dyn Fn(&BackendConfig) -> Result<Arc<dyn AnchorBackend>, AnchorError> + Send + Sync>;

/// Maps backend configuration to live backends.
///
/// Built-in kinds (`local_chain`, `http`) need no registration; `custom`
/// kinds are resolved by factory name.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `custom` backends with `factory = name`.
    /// A later registration under the same name replaces the earlier one.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&BackendConfig) -> Result<Arc<dyn AnchorBackend>, AnchorError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build one backend.
    pub fn build(&self, config: &BackendConfig) -> Result<Arc<dyn AnchorBackend>, AnchorError> {
        let backend: Arc<dyn AnchorBackend> = match &config.kind {
            BackendKind::LocalChain { path } => Arc::new(LocalChainBackend::open(&config.id, path)?),
            BackendKind::Http {
                endpoint,
                timeout_ms,
                auth_token,
            } => Arc::new(HttpBackend::new(
                &config.id,
                endpoint.as_str(),
                Duration::from_millis(*timeout_ms),
                auth_token.clone(),
            )?),
            BackendKind::Custom { factory, .. } => {
                let build = self
                    .factories
                    .get(factory)
                    .ok_or_else(|| AnchorError::UnknownFactory(factory.clone()))?;
                build(config)?
            }
        };
        if backend.id() != config.id {
            return Err(AnchorError::Config(format!(
                "backend configured as {:?} reports id {:?}",
                config.id,
                backend.id()
            )));
        }
        debug!(backend = %config.id, "anchor backend built");
        Ok(backend)
    }

    /// Build every enabled backend in priority order, appending a local
    /// chain backend if none is configured.
    pub fn build_all(&self, config: &DispatcherConfig) -> Result<Vec<Arc<dyn AnchorBackend>>, AnchorError> {
        let mut seen = HashSet::new();
        let mut backends = Vec::new();
        let mut has_local_chain = false;

        for backend in config.backends.iter().filter(|b| b.enabled) {
            if !seen.insert(backend.id.as_str()) {
                return Err(AnchorError::Config(format!("duplicate backend id {:?}", backend.id)));
            }
            has_local_chain |= matches!(backend.kind, BackendKind::LocalChain { .. });
            backends.push(self.build(backend)?);
        }

        if !has_local_chain {
            let mut id = String::from("local");
            while seen.contains(id.as_str()) {
                id.push('_');
            }
            info!(path = %config.default_chain_path.display(), "adding default local chain backend");
            backends.push(self.build(&BackendConfig::local_chain(id, &config.default_chain_path))?);
        }
        Ok(backends)
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("BackendRegistry").field("factories", &names).finish()
    }
}
