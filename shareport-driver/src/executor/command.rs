//! Executor that shells out to the system tools.

use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info, instrument};

use super::{CommandOutput, MountExecutor};
use crate::error::{DriverError, Result};
use crate::share::ShareLocator;
use crate::types::{MountConfig, Owner};

/// Runs `mkdir`, `chown`, `chmod`, `mount` and `umount`, optionally via sudo.
///
/// Each command is bounded by the configured timeout; the child is killed
/// when the timeout fires.
pub struct CommandExecutor {
    use_sudo: bool,
    timeout: Duration,
}

impl CommandExecutor {
    /// Create an executor from mount configuration.
    pub fn new(config: &MountConfig) -> Self {
        Self {
            use_sudo: config.use_sudo,
            timeout: config.command_timeout(),
        }
    }

    /// Create an executor with explicit settings.
    pub fn with_settings(use_sudo: bool, timeout: Duration) -> Self {
        Self { use_sudo, timeout }
    }

    /// Run a command and return its output, failing on a non-zero exit.
    pub async fn run<I, S>(&self, program: &str, args: I) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut argv: Vec<OsString> = Vec::new();
        if self.use_sudo {
            argv.push(program.into());
        }
        argv.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        let binary = if self.use_sudo { "sudo" } else { program };

        let rendered = std::iter::once(binary.to_string())
            .chain(argv.iter().map(|a| a.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ");
        debug!(command = %rendered, "Executing command");

        let mut command = Command::new(binary);
        command
            .args(&argv)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!(command = %rendered, error = %e, "Failed to execute command");
                return Err(DriverError::LocalCommand {
                    command: rendered,
                    output: format!("failed to execute: {}", e),
                });
            }
            Err(_) => {
                error!(command = %rendered, timeout_secs = self.timeout.as_secs(), "Command timed out");
                return Err(DriverError::Timeout {
                    operation: rendered,
                    after: self.timeout,
                });
            }
        };

        let captured = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !output.status.success() {
            error!(command = %rendered, status = %output.status, stderr = %captured.stderr.trim(), "Command failed");
            return Err(DriverError::LocalCommand {
                command: rendered,
                output: format!("{} ({})", captured.combined(), output.status),
            });
        }

        Ok(captured)
    }
}

#[async_trait]
impl MountExecutor for CommandExecutor {
    async fn make_dir_all(&self, path: &Path) -> Result<CommandOutput> {
        self.run("mkdir", [OsStr::new("-p"), path.as_os_str()]).await
    }

    async fn chown(&self, path: &Path, owner: &Owner) -> Result<CommandOutput> {
        let owner = owner.to_string();
        self.run("chown", [OsStr::new(&owner), path.as_os_str()]).await
    }

    async fn chmod(&self, path: &Path, mode: u32) -> Result<CommandOutput> {
        let mode = format!("{:o}", mode);
        self.run("chmod", [OsStr::new(&mode), path.as_os_str()]).await
    }

    #[instrument(skip(self, options), fields(share = %share, mount_point = %path.display()))]
    async fn mount_nfs(&self, share: &ShareLocator, path: &Path, options: &str) -> Result<CommandOutput> {
        let source = share.to_string();
        let mut args: Vec<&OsStr> = vec![OsStr::new("-t"), OsStr::new("nfs")];
        if !options.is_empty() {
            args.push(OsStr::new("-o"));
            args.push(OsStr::new(options));
        }
        args.push(OsStr::new(&source));
        args.push(path.as_os_str());

        let output = self.run("mount", args).await?;
        info!(output = %output.combined(), "NFS share mounted");
        Ok(output)
    }

    #[instrument(skip(self), fields(mount_point = %path.display()))]
    async fn unmount(&self, path: &Path) -> Result<CommandOutput> {
        let output = self.run("umount", [path.as_os_str()]).await?;
        info!(output = %output.combined(), "NFS share unmounted");
        Ok(output)
    }
}
