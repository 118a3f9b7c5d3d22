use anyhow::{Context, Result};
use gatehouse_authz::{DEFAULT_ACQUIRE_TIMEOUT_MS, DEFAULT_MAX_CONNECTIONS, PoolSettings};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

// Provider configuration sourced from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub database_url: String,
    /// Empty selects the default `casbin_rule` table.
    pub rule_table: String,
    pub model_path: PathBuf,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderConfigOverride {
    database_url: Option<String>,
    rule_table: Option<String>,
    model_path: Option<PathBuf>,
    max_connections: Option<u32>,
    acquire_timeout_ms: Option<u64>,
}

impl ProviderConfig {
    pub fn from_env() -> Result<Self> {
        Self::resolve(ProviderConfigOverride::default())
    }

    /// Environment values, with any field set in the `GATEHOUSE_CONFIG` file taking precedence.
    pub fn from_env_or_yaml() -> Result<Self> {
        let override_cfg = match std::env::var("GATEHOUSE_CONFIG") {
            Ok(path) => {
                let contents = fs::read_to_string(&path)
                    .with_context(|| format!("read GATEHOUSE_CONFIG: {path}"))?;
                serde_yaml::from_str(&contents).with_context(|| "parse gatehouse config yaml")?
            }
            Err(_) => ProviderConfigOverride::default(),
        };
        Self::resolve(override_cfg)
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.max_connections,
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
        }
    }

    fn resolve(override_cfg: ProviderConfigOverride) -> Result<Self> {
        let database_url = match override_cfg.database_url {
            Some(value) => value,
            None => std::env::var("GATEHOUSE_DATABASE_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .with_context(|| "GATEHOUSE_DATABASE_URL or DATABASE_URL must be set")?,
        };
        let model_path = match override_cfg.model_path {
            Some(value) => value,
            None => std::env::var("GATEHOUSE_MODEL_PATH")
                .map(PathBuf::from)
                .with_context(|| "GATEHOUSE_MODEL_PATH must be set")?,
        };
        let rule_table = override_cfg
            .rule_table
            .or_else(|| std::env::var("GATEHOUSE_RULE_TABLE").ok())
            .unwrap_or_default();
        let max_connections = match override_cfg.max_connections {
            Some(value) => value,
            None => env_or("GATEHOUSE_PG_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
        };
        let acquire_timeout_ms = match override_cfg.acquire_timeout_ms {
            Some(value) => value,
            None => env_or("GATEHOUSE_PG_ACQUIRE_TIMEOUT_MS", DEFAULT_ACQUIRE_TIMEOUT_MS)?,
        };
        if max_connections == 0 {
            anyhow::bail!("max_connections must be at least 1");
        }
        Ok(Self {
            database_url,
            rule_table: rule_table.trim().to_string(),
            model_path,
            max_connections,
            acquire_timeout_ms,
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value.parse().with_context(|| format!("parse {key}")),
        Err(_) => Ok(default),
    }
}
