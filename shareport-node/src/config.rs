//! Configuration management for the node.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use shareport_driver::{MountConfig, RemoteConfig};

use crate::cli::Args;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/shareport/node.yaml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage API connection
    pub remote: RemoteConfig,
    /// Local mount settings
    pub mount: MountConfig,
    /// Volume plugin server
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| "Failed to parse config file")?;

        Ok(config)
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(ref api_url) = args.api_url {
            self.remote.storage_api_url = api_url.clone();
        }

        if let Some(ref backend) = args.backend {
            self.remote.backend = backend.clone();
        }

        if let Some(ref mount_root) = args.mount_root {
            self.mount.root = PathBuf::from(mount_root);
        }

        if let Some(ref listen) = args.listen {
            self.server.listen_address = listen.clone();
        }

        self
    }

    /// Check the configuration before use.
    ///
    /// Development mode never talks to the storage API, so the remote section
    /// is only checked outside of it.
    pub fn validate(&self, dev: bool) -> Result<()> {
        if !dev {
            self.remote.validate().context("Invalid remote configuration")?;
        }
        self.mount.validate().context("Invalid mount configuration")?;
        self.server.server_addr()?;
        Ok(())
    }
}

/// Volume plugin server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub listen_address: String,
}

impl ServerConfig {
    /// Parsed listen address.
    pub fn server_addr(&self) -> Result<SocketAddr> {
        self.listen_address
            .parse()
            .with_context(|| format!("Invalid listen address: {}", self.listen_address))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1:9876".to_string(),
        }
    }
}
