//! # shareport Driver
//!
//! Attaches remotely managed NFS volumes to the local host.
//!
//! The storage service owns volume metadata and attachment records; the local
//! mount table owns whether a share is mounted. The
//! [`VolumeAttachmentController`] keeps the two in step.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │         VolumeAttachmentController          │
//! │      (attach, detach, path, pass-through)   │
//! └──────┬─────────────────┬─────────────────┬──┘
//!        ▼                 ▼                 ▼
//! ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//! │ RemoteVolume │  │    Mount     │  │  MountState  │
//! │   Service    │  │   Executor   │  │    Probe     │
//! │ (HTTP API)   │  │ (mkdir/mount)│  │(/proc/mounts)│
//! └──────────────┘  └──────────────┘  └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use shareport_driver::{
//!     CommandExecutor, HttpVolumeService, MountConfig, ProcMountsProbe, RemoteConfig,
//!     VolumeAttachmentController,
//! };
//!
//! let mount = MountConfig::default();
//! let controller = VolumeAttachmentController::new(
//!     Arc::new(HttpVolumeService::new(&remote_config)?),
//!     Arc::new(CommandExecutor::new(&mount)),
//!     Arc::new(ProcMountsProbe::new(&mount.mounts_file)),
//!     &mount,
//! );
//!
//! let path = controller.attach("vol1").await?;
//! controller.detach("vol1").await?;
//! ```

pub mod controller;
pub mod error;
pub mod executor;
pub mod mock;
pub mod probe;
pub mod remote;
pub mod share;
pub mod types;

pub use controller::VolumeAttachmentController;
pub use error::{DriverError, Result};
pub use executor::{CommandExecutor, CommandOutput, MountExecutor};
pub use mock::MockCollaborators;
pub use probe::{MountStateProbe, ProcMountsProbe};
pub use remote::{HttpVolumeService, RemoteVolumeService};
pub use share::{derive_local_path, ShareLocator};
pub use types::*;
