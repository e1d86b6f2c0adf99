//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::net::IpAddr;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the HTTP server to.
    /// Override: `LECTERN_BIND_ADDR`
    pub bind_addr: IpAddr,

    /// Port to bind the HTTP server to.
    /// Override: `LECTERN_BIND_PORT`
    pub bind_port: u16,

    /// Minutes between discovery sweeps.
    /// Override: `LECTERN_DISCOVERY_INTERVAL_MINUTES`
    pub discovery_interval_minutes: u64,

    /// Hours between media cleanup passes.
    /// Override: `LECTERN_CLEANUP_INTERVAL_HOURS`
    pub cleanup_interval_hours: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::from([0, 0, 0, 0]),
            bind_port: 49500,
            discovery_interval_minutes: 30,
            cleanup_interval_hours: 24,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("LECTERN_BIND_ADDR") {
            if let Ok(addr) = val.parse() {
                self.bind_addr = addr;
            }
        }

        if let Ok(val) = std::env::var("LECTERN_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }

        if let Ok(val) = std::env::var("LECTERN_DISCOVERY_INTERVAL_MINUTES") {
            if let Ok(minutes) = val.parse() {
                self.discovery_interval_minutes = minutes;
            }
        }

        if let Ok(val) = std::env::var("LECTERN_CLEANUP_INTERVAL_HOURS") {
            if let Ok(hours) = val.parse() {
                self.cleanup_interval_hours = hours;
            }
        }
    }

    /// Converts to lectern-core's Config type, layering the service
    /// credentials from the environment on top.
    pub fn to_core_config(&self) -> lectern_core::Config {
        let mut config = lectern_core::Config::from_env();
        config.discovery_interval =
            std::time::Duration::from_secs(self.discovery_interval_minutes * 60);
        config.cleanup_interval =
            std::time::Duration::from_secs(self.cleanup_interval_hours * 60 * 60);
        config
    }
}
