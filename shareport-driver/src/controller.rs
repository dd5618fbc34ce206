//! Volume attachment controller.
//!
//! Turns "volume exists remotely" into "volume is mounted locally" and back.
//!
//! ## Attach
//!
//! ```text
//! mark_attached ─► derive path ─► get config ─► mounted? ──yes──► done
//!                                                  │no
//!                                                  ▼
//!                             mkdir -p ─► chown | chmod 0777 | - ─► mount
//! ```
//!
//! The remote attach intent is recorded before anything local happens, so an
//! attach interrupted at any point can be repeated: it either finds the mount
//! in place or resumes from the directory step.
//!
//! ## Detach
//!
//! ```text
//! get config ─► derive path ─► umount ─► mark_detached
//! ```
//!
//! The remote record only moves to detached once the local unmount succeeded.
//!
//! ## Concurrency
//!
//! Calls for the same volume name must not overlap; the caller serializes
//! them. Calls for different volumes may run concurrently.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::error::{DriverError, Result};
use crate::executor::MountExecutor;
use crate::probe::MountStateProbe;
use crate::remote::RemoteVolumeService;
use crate::share::ShareLocator;
use crate::types::{
    MountConfig, PermissionPolicy, VolumeConfig, VolumeMetadata, VolumeOptions, WORLD_WRITABLE_MODE,
};

/// Coordinates the remote volume service with the local mount table.
pub struct VolumeAttachmentController {
    remote: Arc<dyn RemoteVolumeService>,
    executor: Arc<dyn MountExecutor>,
    probe: Arc<dyn MountStateProbe>,
    /// Directory shares are mounted under
    mount_root: PathBuf,
    /// Options passed to `mount -o`
    mount_options: String,
}

impl VolumeAttachmentController {
    /// Create a controller from its collaborators.
    pub fn new(
        remote: Arc<dyn RemoteVolumeService>,
        executor: Arc<dyn MountExecutor>,
        probe: Arc<dyn MountStateProbe>,
        config: &MountConfig,
    ) -> Self {
        Self {
            remote,
            executor,
            probe,
            mount_root: config.root.clone(),
            mount_options: config.options.clone(),
        }
    }

    /// Directory shares are mounted under.
    pub fn mount_root(&self) -> &Path {
        &self.mount_root
    }

    // =========================================================================
    // Pass-through operations
    // =========================================================================

    /// Activate the remote backend.
    pub async fn activate(&self) -> Result<()> {
        self.remote.activate().await
    }

    /// Create a volume.
    pub async fn create(&self, name: &str, opts: VolumeOptions) -> Result<()> {
        self.remote.create_volume(name, opts).await
    }

    /// Remove a volume.
    pub async fn remove(&self, name: &str, force: bool) -> Result<()> {
        self.remote.remove_volume(name, force).await
    }

    /// Fetch a volume's metadata and configuration.
    pub async fn get(&self, name: &str) -> Result<(VolumeMetadata, VolumeConfig)> {
        self.remote.get_volume(name).await
    }

    /// List volumes.
    pub async fn list(&self) -> Result<Vec<VolumeMetadata>> {
        self.remote.list_volumes().await
    }

    // =========================================================================
    // Attach / Detach
    // =========================================================================

    /// Local mount path of a volume, without mounting anything.
    pub async fn path(&self, name: &str) -> Result<PathBuf> {
        let (_, config) = self.remote.get_volume(name).await?;
        let share = Self::configured_share(name, &config)?;
        Ok(share.local_path(&self.mount_root))
    }

    /// Attach a volume and return its local mount path.
    ///
    /// Returns immediately when the share is already mounted at the derived
    /// path; no directory, permission or mount command runs in that case.
    #[instrument(skip(self), fields(volume = %name))]
    pub async fn attach(&self, name: &str) -> Result<PathBuf> {
        info!("Attaching volume");

        let share = self.remote.mark_attached(name).await?;
        let mount_point = share.local_path(&self.mount_root);
        debug!(share = %share, mount_point = %mount_point.display(), "Resolved mount point");

        let (_, config) = self.remote.get_volume(name).await?;

        if self.probe.is_mounted(&share, &mount_point).await {
            info!(share = %share, mount_point = %mount_point.display(), "Share already mounted");
            return Ok(mount_point);
        }

        self.executor.make_dir_all(&mount_point).await?;
        self.apply_permissions(&mount_point, &config).await?;
        self.executor
            .mount_nfs(&share, &mount_point, &self.mount_options)
            .await?;

        info!(share = %share, mount_point = %mount_point.display(), "Volume attached");
        Ok(mount_point)
    }

    /// Detach a volume.
    ///
    /// The remote service is told the volume is detached only after the
    /// local unmount succeeded.
    #[instrument(skip(self), fields(volume = %name))]
    pub async fn detach(&self, name: &str) -> Result<()> {
        info!("Detaching volume");

        let (_, config) = self.remote.get_volume(name).await?;
        let share = Self::configured_share(name, &config)?;
        let mount_point = share.local_path(&self.mount_root);

        if let Err(e) = self.executor.unmount(&mount_point).await {
            warn!(mount_point = %mount_point.display(), error = %e, "Unmount failed, leaving volume attached");
            return Err(e);
        }

        self.remote.mark_detached(name).await?;

        info!(mount_point = %mount_point.display(), "Volume detached");
        Ok(())
    }

    fn configured_share<'a>(name: &str, config: &'a VolumeConfig) -> Result<&'a ShareLocator> {
        config.share.as_ref().ok_or_else(|| {
            DriverError::StateInconsistency(format!(
                "volume '{}' has no nfs_share in its configuration",
                name
            ))
        })
    }

    async fn apply_permissions(&self, mount_point: &Path, config: &VolumeConfig) -> Result<()> {
        match config.permission_policy() {
            PermissionPolicy::Preserve => {
                debug!("Pre-existing volume, keeping permissions");
            }
            PermissionPolicy::Chown(owner) => {
                info!(owner = %owner, mount_point = %mount_point.display(), "Changing mount point ownership");
                self.executor.chown(mount_point, &owner).await?;
            }
            PermissionPolicy::WorldWritable => {
                info!(mode = %format!("{:o}", WORLD_WRITABLE_MODE), mount_point = %mount_point.display(), "Changing mount point mode");
                self.executor.chmod(mount_point, WORLD_WRITABLE_MODE).await?;
            }
        }
        Ok(())
    }
}
