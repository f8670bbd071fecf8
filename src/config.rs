use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

use crate::protocol::ProtocolKind;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Socket address for the HTTP API (e.g. `0.0.0.0:8090`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Interval between poll cycles in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Timeout applied to every downstream device call in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// How long in-flight API requests may run after a shutdown signal.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Managed device services.
    #[serde(default = "default_services")]
    pub services: Vec<ServiceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            services: default_services(),
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn default_listen() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_request_timeout_ms() -> u64 {
    2000
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Unique identifier, also used to pick the lock protocol.
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    /// Base URL of the device API (e.g. `http://localhost:8092`).
    pub base_url: String,
    /// Lower number wins when the arbiter has to pick a survivor.
    #[serde(default)]
    pub priority: i32,
    /// Explicit protocol; resolved from `name` when omitted.
    #[serde(default)]
    pub protocol: Option<ProtocolKind>,
}

fn default_services() -> Vec<ServiceConfig> {
    vec![
        ServiceConfig {
            name: "usboveri2s".to_string(),
            display_name: "USB Media Player".to_string(),
            base_url: "http://localhost:8091".to_string(),
            priority: 1,
            protocol: None,
        },
        ServiceConfig {
            name: "usbaudio".to_string(),
            display_name: "USB Audio Bridge".to_string(),
            base_url: "http://localhost:8092".to_string(),
            priority: 2,
            protocol: None,
        },
    ]
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Like [`load_config`], but any failure falls back to the built-in defaults.
pub fn load_or_default<P: AsRef<Path>>(path: P) -> Config {
    let path = path.as_ref();
    match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            warn!(
                config_path = %path.display(),
                error = %format!("{e:#}"),
                "failed to load config, using defaults"
            );
            Config::default()
        }
    }
}

/// Sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(!config.services.is_empty(), "at least one service is required");
    anyhow::ensure!(config.poll_interval_ms > 0, "poll_interval_ms must be > 0");
    anyhow::ensure!(config.request_timeout_ms > 0, "request_timeout_ms must be > 0");
    anyhow::ensure!(config.shutdown_grace_ms > 0, "shutdown_grace_ms must be > 0");
    config
        .listen
        .parse::<std::net::SocketAddr>()
        .with_context(|| format!("invalid listen address: {}", config.listen))?;

    let mut seen = HashSet::new();
    for svc in &config.services {
        anyhow::ensure!(!svc.name.is_empty(), "service name must not be empty");
        anyhow::ensure!(
            seen.insert(svc.name.as_str()),
            "duplicate service name: {}",
            svc.name
        );
        let url = reqwest::Url::parse(&svc.base_url)
            .with_context(|| format!("invalid base_url for {}: {}", svc.name, svc.base_url))?;
        anyhow::ensure!(
            matches!(url.scheme(), "http" | "https"),
            "base_url for {} must be http(s)",
            svc.name
        );
    }
    Ok(())
}
