//! Privileged mount operations.
//!
//! Everything that changes the local filesystem or mount table goes through
//! [`MountExecutor`], so the attach/detach logic can run against a fake.

mod command;

pub use command::*;

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::share::ShareLocator;
use crate::types::Owner;

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Stdout and stderr joined for diagnostics.
    pub fn combined(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", "") => String::new(),
            (out, "") => out.to_string(),
            ("", err) => err.to_string(),
            (out, err) => format!("{}\n{}", out, err),
        }
    }
}

/// Capability boundary for privileged filesystem and mount commands.
///
/// A failing command is reported as [`crate::DriverError::LocalCommand`] with
/// its captured output, or [`crate::DriverError::Timeout`].
#[async_trait]
pub trait MountExecutor: Send + Sync {
    /// `mkdir -p path`
    async fn make_dir_all(&self, path: &Path) -> Result<CommandOutput>;

    /// `chown owner path`
    async fn chown(&self, path: &Path, owner: &Owner) -> Result<CommandOutput>;

    /// `chmod mode path`
    async fn chmod(&self, path: &Path, mode: u32) -> Result<CommandOutput>;

    /// `mount -t nfs [-o options] share path`
    async fn mount_nfs(&self, share: &ShareLocator, path: &Path, options: &str) -> Result<CommandOutput>;

    /// `umount path`
    async fn unmount(&self, path: &Path) -> Result<CommandOutput>;
}
