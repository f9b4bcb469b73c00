//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the racing API key) are referenced by env-var name in the config
//! and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::engine::settlement::default_cutoff;
use crate::storage::DEFAULT_DATA_DIR;
use crate::strategy::ProgressionConfig;
use crate::types::{LedgerKey, Mode, PartitionKey, Variant};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub progression: ProgressionConfig,
    #[serde(default)]
    pub partitions: Vec<PartitionConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub mode: Mode,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Local wall-clock time after which unresolved wagers are forced closed.
    #[serde(default = "default_cutoff")]
    pub settlement_cutoff: NaiveTime,
    /// Offset of the racing day from UTC. Host local time when absent.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// One tracked partition: a variant applied to a ticket type, optionally
/// narrowed to a venue.
#[derive(Debug, Deserialize, Clone)]
pub struct PartitionConfig {
    pub variant: Variant,
    pub ticket: String,
    #[serde(default)]
    pub location: Option<String>,
}

impl PartitionConfig {
    pub fn key(&self, mode: Mode) -> LedgerKey {
        let partition = match &self.location {
            Some(loc) => PartitionKey::with_location(&self.ticket, loc),
            None => PartitionKey::new(&self.ticket),
        };
        LedgerKey::new(self.variant, partition, mode)
    }
}

fn default_data_dir() -> String {
    DEFAULT_DATA_DIR.to_string()
}

fn default_poll_interval() -> u64 {
    10
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse and validate configuration text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        for key in config.ledger_keys() {
            key.partition
                .validate()
                .with_context(|| format!("Invalid partition {key}"))?;
        }
        anyhow::ensure!(
            config.agent.poll_interval_secs > 0,
            "agent.poll_interval_secs must be positive"
        );
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// The racing API key, if one is configured and present in the environment.
    pub fn api_key(&self) -> Option<String> {
        self.provider
            .api_key_env
            .as_deref()
            .and_then(|env| Self::resolve_env(env).ok())
    }

    /// Ledger keys for every configured partition under the agent's mode.
    pub fn ledger_keys(&self) -> Vec<LedgerKey> {
        self.partitions
            .iter()
            .map(|p| p.key(self.agent.mode))
            .collect()
    }
}
