//! In-memory collaborators for testing and development.
//!
//! [`MockVolumeService`], [`RecordingExecutor`] and [`MockMountProbe`] share a
//! [`CallLog`], so tests can assert on the order of remote and local
//! operations across all three. The executor and probe also share a
//! [`MockMountTable`], so a mount made through the executor is visible to the
//! probe.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::info;

use crate::controller::VolumeAttachmentController;
use crate::error::{DriverError, Result};
use crate::executor::{CommandOutput, MountExecutor};
use crate::probe::MountStateProbe;
use crate::remote::RemoteVolumeService;
use crate::share::ShareLocator;
use crate::types::{MountConfig, Owner, VolumeConfig, VolumeMetadata, VolumeOptions};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One observed collaborator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Activate,
    CreateVolume(String),
    RemoveVolume(String),
    GetVolume(String),
    ListVolumes,
    MarkAttached(String),
    MarkDetached(String),
    IsMounted(String, PathBuf),
    MakeDir(PathBuf),
    Chown(PathBuf, String),
    Chmod(PathBuf, u32),
    Mount(String, PathBuf),
    Unmount(PathBuf),
}

impl Call {
    /// Whether this call changes the local filesystem or mount table.
    pub fn is_local_change(&self) -> bool {
        matches!(
            self,
            Call::MakeDir(_) | Call::Chown(..) | Call::Chmod(..) | Call::Mount(..) | Call::Unmount(_)
        )
    }
}

/// Ordered journal of calls shared by the mocks.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, call: Call) {
        lock(&self.0).push(call);
    }

    /// All calls in order.
    pub fn calls(&self) -> Vec<Call> {
        lock(&self.0).clone()
    }

    /// Calls that changed local state, in order.
    pub fn local_changes(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_local_change).collect()
    }

    /// Number of calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        lock(&self.0).iter().filter(|c| predicate(c)).count()
    }

    /// Position of the first call equal to `call`.
    pub fn position(&self, call: &Call) -> Option<usize> {
        lock(&self.0).iter().position(|c| c == call)
    }

    pub fn clear(&self) {
        lock(&self.0).clear();
    }
}

/// Mounted `(share, path)` pairs shared by the executor and probe.
#[derive(Debug, Clone, Default)]
pub struct MockMountTable(Arc<Mutex<HashSet<(String, PathBuf)>>>);

impl MockMountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mount made outside the executor.
    pub fn insert(&self, share: &ShareLocator, path: &Path) {
        lock(&self.0).insert((share.to_string(), path.to_path_buf()));
    }

    pub fn contains(&self, share: &ShareLocator, path: &Path) -> bool {
        lock(&self.0).contains(&(share.to_string(), path.to_path_buf()))
    }

    fn remove_target(&self, path: &Path) -> bool {
        let mut table = lock(&self.0);
        let before = table.len();
        table.retain(|(_, target)| target != path);
        table.len() != before
    }

    /// Drop every entry, as if all shares were unmounted externally.
    pub fn clear(&self) {
        lock(&self.0).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Remote
// =============================================================================

/// Remote operation names accepted by [`MockVolumeService::fail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Activate,
    Create,
    Remove,
    Get,
    List,
    MarkAttached,
    MarkDetached,
}

#[derive(Debug, Clone)]
struct MockVolume {
    metadata: VolumeMetadata,
    config: VolumeConfig,
    /// Raw locator returned by `mark_attached`
    attach_share: Option<String>,
    attached: bool,
}

/// In-memory storage service.
pub struct MockVolumeService {
    log: CallLog,
    volumes: Mutex<HashMap<String, MockVolume>>,
    failures: Mutex<HashSet<RemoteOp>>,
    activated: Mutex<bool>,
    /// Host used for shares of volumes created through `create_volume`
    share_host: String,
}

impl MockVolumeService {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            volumes: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashSet::new()),
            activated: Mutex::new(false),
            share_host: "mock-nfs".to_string(),
        }
    }

    /// Register a volume. `attach_share` is returned verbatim from
    /// `mark_attached`, so it may be malformed on purpose.
    pub fn insert_volume(&self, name: &str, attach_share: Option<&str>, config: VolumeConfig) {
        let volume = MockVolume {
            metadata: VolumeMetadata::named(name),
            config,
            attach_share: attach_share.map(str::to_string),
            attached: false,
        };
        lock(&self.volumes).insert(name.to_string(), volume);
    }

    /// Make every call of `op` fail with a server error.
    pub fn fail(&self, op: RemoteOp) {
        lock(&self.failures).insert(op);
    }

    /// Whether the volume's attachment record says attached.
    pub fn is_attached(&self, name: &str) -> bool {
        lock(&self.volumes).get(name).map(|v| v.attached).unwrap_or(false)
    }

    pub fn is_activated(&self) -> bool {
        *lock(&self.activated)
    }

    fn check(&self, op: RemoteOp, operation: &'static str) -> Result<()> {
        if lock(&self.failures).contains(&op) {
            return Err(DriverError::RemoteCall {
                operation,
                status: 500,
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn not_found(operation: &'static str, name: &str) -> DriverError {
        DriverError::RemoteCall {
            operation,
            status: 404,
            message: format!("volume '{}' not found", name),
        }
    }
}

#[async_trait]
impl RemoteVolumeService for MockVolumeService {
    async fn activate(&self) -> Result<()> {
        self.log.record(Call::Activate);
        self.check(RemoteOp::Activate, "activate")?;
        *lock(&self.activated) = true;
        Ok(())
    }

    async fn create_volume(&self, name: &str, opts: VolumeOptions) -> Result<()> {
        self.log.record(Call::CreateVolume(name.to_string()));
        self.check(RemoteOp::Create, "create volume")?;

        let mut volumes = lock(&self.volumes);
        if volumes.contains_key(name) {
            return Err(DriverError::RemoteCall {
                operation: "create volume",
                status: 409,
                message: format!("volume '{}' already exists", name),
            });
        }

        // Known keys such as uid and gid land in their typed fields
        let mut config = VolumeConfig::try_from(opts)?;
        let share = ShareLocator::parse(&format!("{}:/export/{}", self.share_host, name))?;
        config.share = Some(share.clone());
        config.is_preexisting.get_or_insert(false);
        volumes.insert(
            name.to_string(),
            MockVolume {
                metadata: VolumeMetadata::named(name),
                config,
                attach_share: Some(share.to_string()),
                attached: false,
            },
        );

        info!(volume = %name, "Mock volume created");
        Ok(())
    }

    async fn remove_volume(&self, name: &str, _force: bool) -> Result<()> {
        self.log.record(Call::RemoveVolume(name.to_string()));
        self.check(RemoteOp::Remove, "remove volume")?;
        lock(&self.volumes)
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Self::not_found("remove volume", name))
    }

    async fn get_volume(&self, name: &str) -> Result<(VolumeMetadata, VolumeConfig)> {
        self.log.record(Call::GetVolume(name.to_string()));
        self.check(RemoteOp::Get, "get volume")?;
        lock(&self.volumes)
            .get(name)
            .map(|v| (v.metadata.clone(), v.config.clone()))
            .ok_or_else(|| Self::not_found("get volume", name))
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeMetadata>> {
        self.log.record(Call::ListVolumes);
        self.check(RemoteOp::List, "list volumes")?;
        let mut volumes: Vec<VolumeMetadata> =
            lock(&self.volumes).values().map(|v| v.metadata.clone()).collect();
        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(volumes)
    }

    async fn mark_attached(&self, name: &str) -> Result<ShareLocator> {
        self.log.record(Call::MarkAttached(name.to_string()));
        self.check(RemoteOp::MarkAttached, "attach volume")?;

        let mut volumes = lock(&self.volumes);
        let volume = volumes
            .get_mut(name)
            .ok_or_else(|| Self::not_found("attach volume", name))?;
        let raw = volume.attach_share.clone().ok_or_else(|| {
            DriverError::MalformedMetadata(format!("attach response for '{}' has no share locator", name))
        })?;
        let share = ShareLocator::parse(&raw)?;
        volume.attached = true;
        Ok(share)
    }

    async fn mark_detached(&self, name: &str) -> Result<()> {
        self.log.record(Call::MarkDetached(name.to_string()));
        self.check(RemoteOp::MarkDetached, "detach volume")?;

        let mut volumes = lock(&self.volumes);
        let volume = volumes
            .get_mut(name)
            .ok_or_else(|| Self::not_found("detach volume", name))?;
        volume.attached = false;
        Ok(())
    }
}

// =============================================================================
// Local
// =============================================================================

/// Local operation names accepted by [`RecordingExecutor::fail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalOp {
    MakeDir,
    Chown,
    Chmod,
    Mount,
    Unmount,
}

/// Executor that records commands instead of running them.
pub struct RecordingExecutor {
    log: CallLog,
    table: MockMountTable,
    failures: Mutex<HashSet<LocalOp>>,
}

impl RecordingExecutor {
    pub fn new(log: CallLog, table: MockMountTable) -> Self {
        Self {
            log,
            table,
            failures: Mutex::new(HashSet::new()),
        }
    }

    /// Make every command of kind `op` fail.
    pub fn fail(&self, op: LocalOp) {
        lock(&self.failures).insert(op);
    }

    fn check(&self, op: LocalOp, command: String) -> Result<CommandOutput> {
        if lock(&self.failures).contains(&op) {
            return Err(DriverError::LocalCommand {
                command,
                output: "injected failure".to_string(),
            });
        }
        Ok(CommandOutput::default())
    }
}

#[async_trait]
impl MountExecutor for RecordingExecutor {
    async fn make_dir_all(&self, path: &Path) -> Result<CommandOutput> {
        self.log.record(Call::MakeDir(path.to_path_buf()));
        self.check(LocalOp::MakeDir, format!("mkdir -p {}", path.display()))
    }

    async fn chown(&self, path: &Path, owner: &Owner) -> Result<CommandOutput> {
        self.log.record(Call::Chown(path.to_path_buf(), owner.to_string()));
        self.check(LocalOp::Chown, format!("chown {} {}", owner, path.display()))
    }

    async fn chmod(&self, path: &Path, mode: u32) -> Result<CommandOutput> {
        self.log.record(Call::Chmod(path.to_path_buf(), mode));
        self.check(LocalOp::Chmod, format!("chmod {:o} {}", mode, path.display()))
    }

    async fn mount_nfs(&self, share: &ShareLocator, path: &Path, _options: &str) -> Result<CommandOutput> {
        self.log.record(Call::Mount(share.to_string(), path.to_path_buf()));
        let output = self.check(
            LocalOp::Mount,
            format!("mount -t nfs {} {}", share, path.display()),
        )?;
        self.table.insert(share, path);
        Ok(output)
    }

    async fn unmount(&self, path: &Path) -> Result<CommandOutput> {
        self.log.record(Call::Unmount(path.to_path_buf()));
        let output = self.check(LocalOp::Unmount, format!("umount {}", path.display()))?;
        if !self.table.remove_target(path) {
            return Err(DriverError::LocalCommand {
                command: format!("umount {}", path.display()),
                output: format!("umount: {}: not mounted.", path.display()),
            });
        }
        Ok(output)
    }
}

/// Probe backed by a [`MockMountTable`].
pub struct MockMountProbe {
    log: CallLog,
    table: MockMountTable,
}

impl MockMountProbe {
    pub fn new(log: CallLog, table: MockMountTable) -> Self {
        Self { log, table }
    }
}

#[async_trait]
impl MountStateProbe for MockMountProbe {
    async fn is_mounted(&self, share: &ShareLocator, path: &Path) -> bool {
        self.log.record(Call::IsMounted(share.to_string(), path.to_path_buf()));
        self.table.contains(share, path)
    }
}

/// A full set of wired-up mocks.
#[derive(Clone)]
pub struct MockCollaborators {
    pub log: CallLog,
    pub table: MockMountTable,
    pub remote: Arc<MockVolumeService>,
    pub executor: Arc<RecordingExecutor>,
    pub probe: Arc<MockMountProbe>,
}

impl MockCollaborators {
    pub fn new() -> Self {
        let log = CallLog::new();
        let table = MockMountTable::new();
        Self {
            remote: Arc::new(MockVolumeService::new(log.clone())),
            executor: Arc::new(RecordingExecutor::new(log.clone(), table.clone())),
            probe: Arc::new(MockMountProbe::new(log.clone(), table.clone())),
            log,
            table,
        }
    }

    /// Controller wired to these mocks.
    pub fn controller(&self, config: &MountConfig) -> VolumeAttachmentController {
        VolumeAttachmentController::new(
            self.remote.clone(),
            self.executor.clone(),
            self.probe.clone(),
            config,
        )
    }
}

impl Default for MockCollaborators {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mount_table_follows_executor() {
        let mocks = MockCollaborators::new();
        let share = ShareLocator::parse("server1:/export/vol1").unwrap();
        let path = Path::new("/mnt/export/vol1");

        assert!(!mocks.probe.is_mounted(&share, path).await);
        mocks.executor.mount_nfs(&share, path, "").await.unwrap();
        assert!(mocks.probe.is_mounted(&share, path).await);
        mocks.executor.unmount(path).await.unwrap();
        assert!(!mocks.probe.is_mounted(&share, path).await);

        // Unmounting twice fails like umount does
        assert!(mocks.executor.unmount(path).await.is_err());
    }

    #[tokio::test]
    async fn test_created_volume_is_attachable() {
        let mocks = MockCollaborators::new();
        mocks.remote.create_volume("vol1", VolumeOptions::new()).await.unwrap();

        let share = mocks.remote.mark_attached("vol1").await.unwrap();
        assert_eq!(share.to_string(), "mock-nfs:/export/vol1");
        assert!(mocks.remote.is_attached("vol1"));

        let err = mocks.remote.create_volume("vol1", VolumeOptions::new()).await.unwrap_err();
        assert!(matches!(err, DriverError::RemoteCall { status: 409, .. }));
    }

    #[tokio::test]
    async fn test_created_owner_options_drive_chown() {
        let mocks = MockCollaborators::new();
        let mut opts = VolumeOptions::new();
        opts.insert("uid".into(), serde_json::json!(1000));
        opts.insert("gid".into(), serde_json::json!("100"));
        opts.insert("quota".into(), serde_json::json!("1G"));
        mocks.remote.create_volume("vol1", opts).await.unwrap();

        let (_, config) = mocks.remote.get_volume("vol1").await.unwrap();
        assert_eq!(config.uid.as_deref(), Some("1000"));
        assert_eq!(config.gid.as_deref(), Some("100"));
        assert_eq!(config.extra.get("quota"), Some(&serde_json::json!("1G")));

        let controller = mocks.controller(&MountConfig::default());
        controller.attach("vol1").await.unwrap();
        let path = PathBuf::from("/mnt/export/vol1");
        assert_eq!(mocks.log.count(|c| *c == Call::Chown(path.clone(), "1000:100".into())), 1);
        assert_eq!(mocks.log.count(|c| matches!(c, Call::Chmod(..))), 0);
    }

    #[tokio::test]
    async fn test_create_rejects_malformed_owner() {
        let mocks = MockCollaborators::new();
        let mut opts = VolumeOptions::new();
        opts.insert("uid".into(), serde_json::json!("10:10"));

        let err = mocks.remote.create_volume("vol1", opts).await.unwrap_err();
        assert!(matches!(err, DriverError::MalformedMetadata(_)));
    }
}
