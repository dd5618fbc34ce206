//! Attach/detach orchestration tests.
//!
//! These run the controller against the in-memory collaborators and assert on
//! the exact sequence of remote and local operations.

use std::path::{Path, PathBuf};

use shareport_driver::mock::{Call, LocalOp, RemoteOp};
use shareport_driver::{
    DriverError, MockCollaborators, MountConfig, ShareLocator, VolumeAttachmentController, VolumeConfig,
};

const SHARE: &str = "server1:/export/vol1";
const MOUNT_POINT: &str = "/mnt/export/vol1";

fn share() -> ShareLocator {
    ShareLocator::parse(SHARE).unwrap()
}

fn setup(config: VolumeConfig) -> (MockCollaborators, VolumeAttachmentController) {
    let mocks = MockCollaborators::new();
    mocks.remote.insert_volume("vol1", Some(SHARE), config);
    let controller = mocks.controller(&MountConfig::default());
    (mocks, controller)
}

fn fresh_owned_config() -> VolumeConfig {
    VolumeConfig::for_share(share())
        .with_preexisting(false)
        .with_owner(Some("1000"), Some("1000"))
}

/// Test the full attach sequence for a freshly provisioned volume with owner hints.
#[tokio::test]
async fn test_attach_fresh_volume_with_owner() {
    let (mocks, controller) = setup(fresh_owned_config());

    let path = controller.attach("vol1").await.unwrap();
    assert_eq!(path, PathBuf::from(MOUNT_POINT));

    assert_eq!(
        mocks.log.calls(),
        vec![
            Call::MarkAttached("vol1".into()),
            Call::GetVolume("vol1".into()),
            Call::IsMounted(SHARE.into(), MOUNT_POINT.into()),
            Call::MakeDir(MOUNT_POINT.into()),
            Call::Chown(MOUNT_POINT.into(), "1000:1000".into()),
            Call::Mount(SHARE.into(), MOUNT_POINT.into()),
        ]
    );
    assert_eq!(mocks.log.count(|c| matches!(c, Call::Chmod(..))), 0);
    assert!(mocks.remote.is_attached("vol1"));
    assert!(mocks.table.contains(&share(), Path::new(MOUNT_POINT)));
}

/// Test that attaching an already mounted volume touches nothing locally.
#[tokio::test]
async fn test_attach_already_mounted_is_noop() {
    let (mocks, controller) = setup(fresh_owned_config());
    mocks.table.insert(&share(), Path::new(MOUNT_POINT));

    let path = controller.attach("vol1").await.unwrap();
    assert_eq!(path, PathBuf::from(MOUNT_POINT));
    assert!(mocks.log.local_changes().is_empty());
}

/// Test that a repeated attach returns the same path and mounts only once.
#[tokio::test]
async fn test_attach_is_idempotent() {
    let (mocks, controller) = setup(fresh_owned_config());

    let first = controller.attach("vol1").await.unwrap();
    let second = controller.attach("vol1").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(mocks.log.count(|c| matches!(c, Call::Mount(..))), 1);
    assert_eq!(mocks.log.count(|c| matches!(c, Call::MakeDir(_))), 1);
    assert_eq!(mocks.log.count(|c| matches!(c, Call::Chown(..))), 1);
}

/// Test that a fresh volume without owner hints is made world writable.
#[tokio::test]
async fn test_attach_fresh_volume_without_owner_is_world_writable() {
    let (mocks, controller) = setup(VolumeConfig::for_share(share()).with_preexisting(false));

    controller.attach("vol1").await.unwrap();

    assert_eq!(
        mocks.log.local_changes(),
        vec![
            Call::MakeDir(MOUNT_POINT.into()),
            Call::Chmod(MOUNT_POINT.into(), 0o777),
            Call::Mount(SHARE.into(), MOUNT_POINT.into()),
        ]
    );
}

/// Test that a single ownership hint is enough to chown instead of chmod.
#[tokio::test]
async fn test_attach_with_gid_only() {
    let config = VolumeConfig::for_share(share())
        .with_preexisting(false)
        .with_owner(None, Some("100"));
    let (mocks, controller) = setup(config);

    controller.attach("vol1").await.unwrap();

    assert_eq!(mocks.log.count(|c| *c == Call::Chown(MOUNT_POINT.into(), ":100".into())), 1);
    assert_eq!(mocks.log.count(|c| matches!(c, Call::Chmod(..))), 0);
}

/// Test that pre-existing or unknown provenance leaves permissions alone.
#[tokio::test]
async fn test_attach_preexisting_skips_permissions() {
    for config in [
        VolumeConfig::for_share(share())
            .with_preexisting(true)
            .with_owner(Some("1000"), Some("1000")),
        VolumeConfig::for_share(share()),
    ] {
        let (mocks, controller) = setup(config);

        controller.attach("vol1").await.unwrap();

        assert_eq!(
            mocks.log.local_changes(),
            vec![
                Call::MakeDir(MOUNT_POINT.into()),
                Call::Mount(SHARE.into(), MOUNT_POINT.into()),
            ]
        );
    }
}

/// Test that a malformed share locator aborts before any local operation.
#[tokio::test]
async fn test_attach_malformed_share_does_nothing_locally() {
    let mocks = MockCollaborators::new();
    mocks.remote.insert_volume("vol1", Some("server1-export-vol1"), VolumeConfig::default());
    let controller = mocks.controller(&MountConfig::default());

    let err = controller.attach("vol1").await.unwrap_err();
    assert!(matches!(err, DriverError::MalformedMetadata(_)));
    assert!(mocks.log.local_changes().is_empty());
    assert_eq!(mocks.log.count(|c| matches!(c, Call::IsMounted(..))), 0);
}

/// Test that a missing share locator aborts before any local operation.
#[tokio::test]
async fn test_attach_missing_share_does_nothing_locally() {
    let mocks = MockCollaborators::new();
    mocks.remote.insert_volume("vol1", None, VolumeConfig::default());
    let controller = mocks.controller(&MountConfig::default());

    let err = controller.attach("vol1").await.unwrap_err();
    assert!(matches!(err, DriverError::MalformedMetadata(_)));
    assert!(mocks.log.local_changes().is_empty());
}

/// Test that remote failures propagate without local side effects.
#[tokio::test]
async fn test_attach_remote_failures() {
    let (mocks, controller) = setup(fresh_owned_config());
    mocks.remote.fail(RemoteOp::MarkAttached);
    let err = controller.attach("vol1").await.unwrap_err();
    assert!(matches!(err, DriverError::RemoteCall { status: 500, .. }));
    assert!(mocks.log.local_changes().is_empty());

    let (mocks, controller) = setup(fresh_owned_config());
    mocks.remote.fail(RemoteOp::Get);
    assert!(controller.attach("vol1").await.is_err());
    assert!(mocks.log.local_changes().is_empty());

    let err = controller.attach("unknown").await.unwrap_err();
    assert!(matches!(err, DriverError::RemoteCall { status: 404, .. }));
}

/// Test that a failed mkdir stops the attach before permissions and mount.
#[tokio::test]
async fn test_attach_mkdir_failure_is_fatal() {
    let (mocks, controller) = setup(fresh_owned_config());
    mocks.executor.fail(LocalOp::MakeDir);

    let err = controller.attach("vol1").await.unwrap_err();
    assert!(matches!(err, DriverError::LocalCommand { .. }));
    assert_eq!(mocks.log.local_changes(), vec![Call::MakeDir(MOUNT_POINT.into())]);
}

/// Test that a failed permission change prevents the mount.
#[tokio::test]
async fn test_attach_permission_failure_prevents_mount() {
    let (mocks, controller) = setup(fresh_owned_config());
    mocks.executor.fail(LocalOp::Chown);

    let err = controller.attach("vol1").await.unwrap_err();
    assert!(matches!(err, DriverError::LocalCommand { .. }));
    assert_eq!(mocks.log.count(|c| matches!(c, Call::Mount(..))), 0);

    let (mocks, controller) = setup(VolumeConfig::for_share(share()).with_preexisting(false));
    mocks.executor.fail(LocalOp::Chmod);
    assert!(controller.attach("vol1").await.is_err());
    assert_eq!(mocks.log.count(|c| matches!(c, Call::Mount(..))), 0);
}

/// Test that a mount failure is returned with the command output.
#[tokio::test]
async fn test_attach_mount_failure_carries_output() {
    let (mocks, controller) = setup(fresh_owned_config());
    mocks.executor.fail(LocalOp::Mount);

    match controller.attach("vol1").await.unwrap_err() {
        DriverError::LocalCommand { command, output } => {
            assert!(command.contains(SHARE));
            assert!(command.contains(MOUNT_POINT));
            assert_eq!(output, "injected failure");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

/// Test that attach resumes cleanly after an interrupted attempt.
#[tokio::test]
async fn test_attach_retry_after_mount_failure() {
    let mocks = MockCollaborators::new();
    mocks.remote.insert_volume("vol1", Some(SHARE), fresh_owned_config());
    mocks.executor.fail(LocalOp::Mount);
    let controller = mocks.controller(&MountConfig::default());
    assert!(controller.attach("vol1").await.is_err());
    assert!(mocks.remote.is_attached("vol1"));

    // A fresh executor stands in for the condition clearing
    let retry = MockCollaborators {
        executor: std::sync::Arc::new(shareport_driver::mock::RecordingExecutor::new(
            mocks.log.clone(),
            mocks.table.clone(),
        )),
        ..mocks.clone()
    };
    let path = retry.controller(&MountConfig::default()).attach("vol1").await.unwrap();
    assert_eq!(path, PathBuf::from(MOUNT_POINT));
    assert!(mocks.table.contains(&share(), Path::new(MOUNT_POINT)));
}

/// Test the detach sequence: unmount strictly before mark detached.
#[tokio::test]
async fn test_detach_unmounts_then_marks_detached() {
    let (mocks, controller) = setup(fresh_owned_config());
    controller.attach("vol1").await.unwrap();
    mocks.log.clear();

    controller.detach("vol1").await.unwrap();

    assert_eq!(
        mocks.log.calls(),
        vec![
            Call::GetVolume("vol1".into()),
            Call::Unmount(MOUNT_POINT.into()),
            Call::MarkDetached("vol1".into()),
        ]
    );
    assert_eq!(mocks.log.count(|c| matches!(c, Call::MarkDetached(_))), 1);
    assert!(!mocks.remote.is_attached("vol1"));
    assert!(mocks.table.is_empty());
}

/// Test that a failed unmount never signals detached.
#[tokio::test]
async fn test_detach_unmount_failure_keeps_remote_attached() {
    let (mocks, controller) = setup(fresh_owned_config());
    controller.attach("vol1").await.unwrap();
    mocks.executor.fail(LocalOp::Unmount);

    let err = controller.detach("vol1").await.unwrap_err();
    assert!(matches!(err, DriverError::LocalCommand { .. }));
    assert_eq!(mocks.log.count(|c| matches!(c, Call::MarkDetached(_))), 0);
    assert!(mocks.remote.is_attached("vol1"));
}

/// Test that a volume without a share in its config cannot be detached.
#[tokio::test]
async fn test_detach_without_share_is_inconsistent() {
    let (mocks, controller) = setup(VolumeConfig::default());

    let err = controller.detach("vol1").await.unwrap_err();
    assert!(matches!(err, DriverError::StateInconsistency(_)));
    assert!(mocks.log.local_changes().is_empty());
    assert_eq!(mocks.log.count(|c| matches!(c, Call::MarkDetached(_))), 0);
}

/// Test that a mark-detached failure surfaces after a successful unmount.
#[tokio::test]
async fn test_detach_remote_failure_after_unmount() {
    let (mocks, controller) = setup(fresh_owned_config());
    controller.attach("vol1").await.unwrap();
    mocks.remote.fail(RemoteOp::MarkDetached);

    let err = controller.detach("vol1").await.unwrap_err();
    assert!(matches!(err, DriverError::RemoteCall { .. }));
    let unmount = mocks.log.position(&Call::Unmount(MOUNT_POINT.into())).unwrap();
    let detach = mocks.log.position(&Call::MarkDetached("vol1".into())).unwrap();
    assert!(unmount < detach);
}

/// Test that attach and detach agree on the path under a custom mount root.
#[tokio::test]
async fn test_custom_mount_root() {
    let mocks = MockCollaborators::new();
    mocks.remote.insert_volume("vol1", Some(SHARE), VolumeConfig::for_share(share()));
    let config = MountConfig {
        root: PathBuf::from("/var/lib/shareport/mounts"),
        ..Default::default()
    };
    let controller = mocks.controller(&config);

    let path = controller.attach("vol1").await.unwrap();
    assert_eq!(path, PathBuf::from("/var/lib/shareport/mounts/export/vol1"));
    assert_eq!(controller.path("vol1").await.unwrap(), path);

    controller.detach("vol1").await.unwrap();
    assert_eq!(mocks.log.count(|c| *c == Call::Unmount(path.clone())), 1);
}

/// Test the pass-through operations.
#[tokio::test]
async fn test_pass_through_operations() {
    let mocks = MockCollaborators::new();
    let controller = mocks.controller(&MountConfig::default());

    controller.activate().await.unwrap();
    assert!(mocks.remote.is_activated());

    controller.create("vol-a", Default::default()).await.unwrap();
    controller.create("vol-b", Default::default()).await.unwrap();
    let names: Vec<String> = controller.list().await.unwrap().into_iter().map(|v| v.name).collect();
    assert_eq!(names, vec!["vol-a", "vol-b"]);

    let (metadata, config) = controller.get("vol-a").await.unwrap();
    assert_eq!(metadata.name, "vol-a");
    assert_eq!(config.is_preexisting, Some(false));

    controller.remove("vol-a", false).await.unwrap();
    assert!(controller.get("vol-a").await.is_err());
    assert!(mocks.log.local_changes().is_empty());
}
