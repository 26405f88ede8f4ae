// src/config.rs
use anyhow::{anyhow, Context, Result};
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub amqp_uri: String,
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_connection_name")]
    pub connection_name: String,
    /// Queue the music-generation worker consumes from.
    #[serde(default = "default_request_queue")]
    pub request_queue: String,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
}

// Default values
fn default_connection_timeout_ms() -> u64 { 5000 }
fn default_connection_name() -> String { "rabbit-rpc".to_string() }
fn default_request_queue() -> String { "music_requests".to_string() }
fn default_rpc_timeout_secs() -> u64 { 60 }

impl RpcConfig {
    pub fn new(amqp_uri: impl Into<String>) -> Self {
        Self {
            amqp_uri: amqp_uri.into(),
            connection_timeout_ms: default_connection_timeout_ms(),
            connection_name: default_connection_name(),
            request_queue: default_request_queue(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
        }
    }

    /// Reads `.env` (if present) and then the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let amqp_uri = lookup("RABBITMQ_URL")
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| anyhow!("missing required configuration variable: RABBITMQ_URL"))?;

        let mut config = Self::new(amqp_uri);

        if let Some(val) = lookup("RABBITMQ_CONNECT_TIMEOUT_MS") {
            config.connection_timeout_ms = val
                .parse()
                .with_context(|| format!("Invalid RABBITMQ_CONNECT_TIMEOUT_MS: {}", val))?;
        }
        if let Some(val) = lookup("RABBITMQ_CONNECTION_NAME") {
            config.connection_name = val;
        }
        if let Some(val) = lookup("RPC_REQUEST_QUEUE") {
            config.request_queue = val;
        }
        if let Some(val) = lookup("RPC_TIMEOUT_SECONDS") {
            config.rpc_timeout_secs = val
                .parse()
                .with_context(|| format!("Invalid RPC_TIMEOUT_SECONDS: {}", val))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config file at {}", path.display()))?;

        let config: RpcConfig = serde_json::from_str(&content)
            .context("Configuration file contains invalid JSON or missing required fields")?;

        config.validate()?;
        Ok(config)
    }

    /// Uses a config file when one can be found, otherwise the environment.
    pub fn load() -> Result<Self> {
        match find_config_file() {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)
            }
            None => {
                debug!("No config file found, reading environment");
                Self::from_env()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.amqp_uri.is_empty() {
            return Err(anyhow!("Configuration error: amqp_uri cannot be empty"));
        }
        if self.connection_timeout_ms == 0 {
            return Err(anyhow!("Configuration error: connection_timeout_ms must be positive"));
        }
        if self.rpc_timeout_secs == 0 {
            return Err(anyhow!("Configuration error: rpc_timeout_secs must be positive"));
        }
        if self.request_queue.is_empty() {
            return Err(anyhow!("Configuration error: request_queue cannot be empty"));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}

pub fn find_config_file() -> Option<PathBuf> {
    let locations = [
        ("Current directory", Path::new("RabbitRpc.json")),
        ("Current directory (alternative)", Path::new("config/RabbitRpc.json")),
    ];

    for (location_name, path) in locations.iter() {
        if path.exists() {
            debug!("Found config file in {}: {}", location_name, path.display());
            return Some(path.to_path_buf());
        }
    }

    if let Some(home_dir) = home::home_dir() {
        let home_config = home_dir.join(".RabbitRpc.json");
        if home_config.exists() {
            debug!("Found config file in home directory: {}", home_config.display());
            return Some(home_config);
        }
    }

    None
}
