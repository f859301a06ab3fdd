//! Configuration parsing and management.

use crate::engine::AllocateChain;
use chainbridge_types::{ChainId, LogLevel};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Process-wide bridge settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Verbosity handed to the engine at init
    #[serde(default)]
    pub log_level: LogLevel,

    /// Unread responses a subscriber may hold before the chain stops polling
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    128
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl BridgeConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_log_level(mut self, log_level: LogLevel) -> Self {
        self.log_level = log_level;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// tokio's bounded channels reject a zero capacity
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "channel_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Parameters for adding one chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain specification text, opaque to the bridge
    pub spec: String,

    /// Database snapshot from a previous run
    #[serde(default)]
    pub database_content: Option<String>,

    /// Chains the new one may use as its relay chain
    #[serde(default)]
    pub potential_relay_chains: Vec<ChainId>,

    #[serde(default)]
    pub disable_json_rpc: bool,

    #[serde(default = "default_limit")]
    pub json_rpc_max_pending_requests: u32,

    #[serde(default = "default_limit")]
    pub json_rpc_max_subscriptions: u32,
}

fn default_limit() -> u32 {
    u32::MAX
}

impl ChainConfig {
    pub fn new(spec: impl Into<String>) -> Self {
        Self {
            spec: spec.into(),
            database_content: None,
            potential_relay_chains: Vec::new(),
            disable_json_rpc: false,
            json_rpc_max_pending_requests: default_limit(),
            json_rpc_max_subscriptions: default_limit(),
        }
    }

    pub fn with_database(mut self, content: impl Into<String>) -> Self {
        self.database_content = Some(content.into());
        self
    }

    pub fn with_relay_chains(mut self, chains: impl IntoIterator<Item = ChainId>) -> Self {
        self.potential_relay_chains = chains.into_iter().collect();
        self
    }

    pub fn with_json_rpc_disabled(mut self) -> Self {
        self.disable_json_rpc = true;
        self
    }

    pub fn with_max_pending_requests(mut self, max: u32) -> Self {
        self.json_rpc_max_pending_requests = max;
        self
    }

    pub fn with_max_subscriptions(mut self, max: u32) -> Self {
        self.json_rpc_max_subscriptions = max;
        self
    }

    /// Build the engine call, with `parents` already filtered to live chains.
    ///
    /// A max-pending value of 0 tells the engine JSON-RPC is disabled.
    pub fn allocation(&self, parents: Vec<ChainId>) -> AllocateChain {
        AllocateChain {
            spec: self.spec.as_bytes().to_vec(),
            database_content: self
                .database_content
                .as_deref()
                .unwrap_or_default()
                .as_bytes()
                .to_vec(),
            parents,
            max_pending_requests: if self.disable_json_rpc {
                0
            } else {
                self.json_rpc_max_pending_requests
            },
            max_subscriptions: self.json_rpc_max_subscriptions,
        }
    }
}
