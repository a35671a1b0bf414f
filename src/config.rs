//! Layered runtime configuration: built-in defaults, then an optional TOML
//! file, then `REQFLOW__*` environment variables.
use crate::gateway::CommandGateway;
use crate::risk::{DEFAULT_RISK_TIMEOUT, HttpRiskScorer, NoopRiskScorer, RiskEnrichmentClient, RiskScorer};
use crate::store::{MemoryStore, RequisitionStore, SledStore};
use crate::validation::ValidationEngine;
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "reqflow.toml";
pub const ENV_PREFIX: &str = "REQFLOW";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub store: StoreConfig,
    pub risk: RiskConfig,
    pub gateway: GatewayConfig,
    pub validation: ValidationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sled,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sled,
            path: PathBuf::from("reqflow.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Scorer endpoint. Without one every lookup degrades.
    pub base_url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: DEFAULT_RISK_TIMEOUT.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub latency_ceiling_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            latency_ceiling_ms: crate::gateway::DEFAULT_LATENCY_CEILING.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub strict_currency: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            strict_currency: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl WorkflowConfig {
    /// Load with precedence defaults < file < environment. An explicit `path`
    /// must exist; otherwise `reqflow.toml` is read when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
            }
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                builder = builder.add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Toml));
            }
            None => {}
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// A risk lookup has to be able to degrade before the gateway gives up on
    /// the command, so its timeout must sit below the latency ceiling.
    pub fn validate(&self) -> Result<()> {
        if self.risk.timeout_ms >= self.gateway.latency_ceiling_ms {
            anyhow::bail!(
                "risk.timeout_ms ({}) must be below gateway.latency_ceiling_ms ({})",
                self.risk.timeout_ms,
                self.gateway.latency_ceiling_ms
            );
        }
        Ok(())
    }

    /// Load `.env` if it exists, before [`WorkflowConfig::load`] reads the environment.
    pub fn load_env_file() -> Result<bool> {
        if Path::new(".env").exists() {
            dotenvy::dotenv().context("failed to load .env")?;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn open_store(&self) -> Result<Arc<dyn RequisitionStore>> {
        Ok(match self.store.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Sled => Arc::new(
                SledStore::open(&self.store.path)
                    .with_context(|| format!("failed to open store at {}", self.store.path.display()))?,
            ),
        })
    }

    pub fn risk_client(&self) -> RiskEnrichmentClient {
        let scorer: Arc<dyn RiskScorer> = match &self.risk.base_url {
            Some(url) => Arc::new(HttpRiskScorer::new(url.clone())),
            None => Arc::new(NoopRiskScorer),
        };
        RiskEnrichmentClient::with_timeout(scorer, Duration::from_millis(self.risk.timeout_ms))
    }

    /// Wire a gateway over `store` using this configuration.
    pub fn gateway(&self, store: Arc<dyn RequisitionStore>) -> CommandGateway {
        CommandGateway::new(
            store,
            ValidationEngine::new(self.validation.strict_currency),
            self.risk_client(),
        )
        .with_latency_ceiling(Duration::from_millis(self.gateway.latency_ceiling_ms))
    }
}
