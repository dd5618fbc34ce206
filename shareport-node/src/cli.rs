//! Command-line argument parsing.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};

/// shareport Node - NFS volume driver
#[derive(Parser, Debug)]
#[command(name = "shareport-node")]
#[command(about = "shareport Node - attaches remotely managed NFS volumes to this host")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (optional, defaults used if not found)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Log format (pretty, json)
    #[arg(long, default_value = "pretty", global = true)]
    pub log_format: String,

    /// Base URL of the storage API
    #[arg(long, env = "SHAREPORT_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Storage backend name
    #[arg(long, global = true)]
    pub backend: Option<String>,

    /// Directory shares are mounted under
    #[arg(long, global = true)]
    pub mount_root: Option<String>,

    /// Listen address for the volume plugin server
    #[arg(long, global = true)]
    pub listen: Option<String>,

    /// Enable development mode (in-memory storage service and mount table)
    #[arg(long, global = true)]
    pub dev: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Operations exposed by the node.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Serve the Docker volume plugin protocol over HTTP
    Serve,
    /// Activate the storage backend
    Activate,
    /// Create a volume
    Create {
        name: String,
        /// Volume option as key=value (repeatable)
        #[arg(short = 'o', long = "opt", value_parser = parse_option)]
        opts: Vec<(String, String)>,
    },
    /// Remove a volume
    Remove {
        name: String,
        /// Remove even if the volume still holds data
        #[arg(long)]
        force: bool,
    },
    /// Show a volume's metadata and configuration
    Get { name: String },
    /// List volumes
    List,
    /// Mount a volume on this host and print its path
    Attach { name: String },
    /// Unmount a volume from this host
    Detach { name: String },
    /// Print the local mount path of a volume without mounting it
    Path { name: String },
}

fn parse_option(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected key=value, got '{}'", raw))?;
    if key.is_empty() {
        return Err(anyhow!("option key must not be empty in '{}'", raw));
    }
    Ok((key.to_string(), value.to_string()))
}
