//! # shareport Node
//!
//! Attaches NFS volumes managed by a remote storage API to this host.
//!
//! ## Features
//! - Volume lifecycle through the storage API (create, remove, get, list)
//! - Attach/detach: mount point creation, permissions, NFS mount and unmount
//! - Docker volume plugin server (`serve`)
//!
//! ## Usage
//! ```bash
//! shareport-node --config /etc/shareport/node.yaml serve
//! shareport-node attach vol1
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use shareport_common::LogFormat;
use shareport_driver::{
    CommandExecutor, HttpVolumeService, MockCollaborators, ProcMountsProbe, VolumeAttachmentController,
};

mod cli;
mod commands;
mod config;
mod server;

use cli::{Args, Command};
use config::{Config, DEFAULT_CONFIG_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    match args.log_format.parse::<LogFormat>()? {
        LogFormat::Pretty => shareport_common::init_logging(&args.log_level)?,
        LogFormat::Json => shareport_common::init_logging_json(&args.log_level)?,
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting shareport node");

    let config = load_config(&args)?;
    config.validate(args.dev)?;

    info!(
        api = %config.remote.storage_api_url,
        backend = %config.remote.backend,
        mount_root = %config.mount.root.display(),
        dev = args.dev,
        "Node configured"
    );

    let controller = build_controller(&config, args.dev)?;

    match &args.command {
        Command::Serve => {
            if let Err(e) = server::run(&config.server, controller).await {
                error!(error = %e, "Server failed");
                return Err(e);
            }
        }
        command => {
            let output = commands::execute(&controller, command).await?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Load configuration from the explicit path, the default path, or defaults.
fn load_config(args: &Args) -> Result<Config> {
    let config = match &args.config {
        Some(config_path) => match Config::load(config_path) {
            Ok(cfg) => {
                info!(config_path = %config_path, "Configuration loaded");
                cfg
            }
            Err(e) => {
                error!(error = %e, path = %config_path, "Failed to load configuration");
                return Err(e);
            }
        },
        None => match Config::load(DEFAULT_CONFIG_PATH) {
            Ok(cfg) => {
                info!(config_path = %DEFAULT_CONFIG_PATH, "Configuration loaded from default location");
                cfg
            }
            Err(_) => {
                info!("No config file found, using CLI arguments and defaults");
                Config::default()
            }
        },
    };

    Ok(config.with_cli_overrides(args))
}

/// Wire the controller to real collaborators, or to in-memory ones in dev mode.
fn build_controller(config: &Config, dev: bool) -> Result<VolumeAttachmentController> {
    if dev {
        warn!("Development mode: using in-memory storage service and mount table");
        return Ok(MockCollaborators::new().controller(&config.mount));
    }

    let remote = HttpVolumeService::new(&config.remote).context("Failed to create storage API client")?;
    let executor = CommandExecutor::new(&config.mount);
    let probe = ProcMountsProbe::new(&config.mount.mounts_file);

    Ok(VolumeAttachmentController::new(
        Arc::new(remote),
        Arc::new(executor),
        Arc::new(probe),
        &config.mount,
    ))
}
