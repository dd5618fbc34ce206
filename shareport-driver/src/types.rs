//! Volume and driver configuration types.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DriverError, Result};
use crate::share::ShareLocator;

/// Free-form options passed through to volume creation.
pub type VolumeOptions = Map<String, Value>;

/// Server-side identity of a volume.
///
/// Uses the PascalCase keys of the Docker volume plugin protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeMetadata {
    /// Volume name
    pub name: String,
    /// Opaque identifier assigned by the storage service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Mountpoint as reported by the storage service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<String>,
}

impl VolumeMetadata {
    /// Metadata carrying only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Typed view of the configuration map the storage service keeps per volume.
///
/// Known keys are validated while decoding; everything else is kept in
/// `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct VolumeConfig {
    /// NFS export backing the volume (`nfs_share`)
    pub share: Option<ShareLocator>,
    /// Whether the export existed before the storage service adopted it (`isPreexisting`)
    pub is_preexisting: Option<bool>,
    /// Owner to apply to a freshly provisioned volume
    pub uid: Option<String>,
    /// Group to apply to a freshly provisioned volume
    pub gid: Option<String>,
    /// Remaining keys
    pub extra: BTreeMap<String, Value>,
}

const KEY_SHARE: &str = "nfs_share";
const KEY_PREEXISTING: &str = "isPreexisting";
const KEY_UID: &str = "uid";
const KEY_GID: &str = "gid";

impl VolumeConfig {
    /// Config for a volume backed by `share`.
    pub fn for_share(share: ShareLocator) -> Self {
        Self {
            share: Some(share),
            ..Default::default()
        }
    }

    /// Mark the volume as pre-existing or freshly provisioned.
    pub fn with_preexisting(mut self, preexisting: bool) -> Self {
        self.is_preexisting = Some(preexisting);
        self
    }

    /// Set ownership hints.
    pub fn with_owner(mut self, uid: Option<&str>, gid: Option<&str>) -> Self {
        self.uid = uid.map(str::to_string);
        self.gid = gid.map(str::to_string);
        self
    }

    /// Permission change attach applies to a new mount directory.
    ///
    /// Only freshly provisioned volumes (`isPreexisting == false`) get their
    /// permissions touched. An absent flag counts as pre-existing.
    pub fn permission_policy(&self) -> PermissionPolicy {
        match self.is_preexisting {
            Some(false) => {
                if self.uid.is_some() || self.gid.is_some() {
                    PermissionPolicy::Chown(Owner {
                        uid: self.uid.clone(),
                        gid: self.gid.clone(),
                    })
                } else {
                    PermissionPolicy::WorldWritable
                }
            }
            _ => PermissionPolicy::Preserve,
        }
    }
}

fn owner_field(key: &str, value: Value) -> Result<String> {
    let id = match value {
        Value::String(s) => s,
        Value::Number(n) if n.is_u64() => n.to_string(),
        other => {
            return Err(DriverError::MalformedMetadata(format!(
                "config key '{}' must be a string or non-negative integer, got {}",
                key, other
            )))
        }
    };
    if id.is_empty() || id.contains(':') || id.chars().any(char::is_whitespace) {
        return Err(DriverError::MalformedMetadata(format!(
            "config key '{}' has invalid value '{}'",
            key, id
        )));
    }
    Ok(id)
}

impl TryFrom<Map<String, Value>> for VolumeConfig {
    type Error = DriverError;

    fn try_from(map: Map<String, Value>) -> Result<Self> {
        let mut config = VolumeConfig::default();

        for (key, value) in map {
            match key.as_str() {
                KEY_SHARE => match value {
                    Value::String(s) => config.share = Some(ShareLocator::parse(&s)?),
                    Value::Null => {}
                    other => {
                        return Err(DriverError::MalformedMetadata(format!(
                            "config key '{}' must be a string, got {}",
                            KEY_SHARE, other
                        )))
                    }
                },
                KEY_PREEXISTING => match value {
                    Value::Bool(b) => config.is_preexisting = Some(b),
                    Value::Null => {}
                    other => {
                        return Err(DriverError::MalformedMetadata(format!(
                            "config key '{}' must be a boolean, got {}",
                            KEY_PREEXISTING, other
                        )))
                    }
                },
                KEY_UID if !value.is_null() => config.uid = Some(owner_field(KEY_UID, value)?),
                KEY_GID if !value.is_null() => config.gid = Some(owner_field(KEY_GID, value)?),
                KEY_UID | KEY_GID => {}
                _ => {
                    config.extra.insert(key, value);
                }
            }
        }

        Ok(config)
    }
}

impl From<VolumeConfig> for Map<String, Value> {
    fn from(config: VolumeConfig) -> Self {
        let mut map: Map<String, Value> = config.extra.into_iter().collect();
        if let Some(share) = config.share {
            map.insert(KEY_SHARE.into(), Value::String(share.to_string()));
        }
        if let Some(preexisting) = config.is_preexisting {
            map.insert(KEY_PREEXISTING.into(), Value::Bool(preexisting));
        }
        if let Some(uid) = config.uid {
            map.insert(KEY_UID.into(), Value::String(uid));
        }
        if let Some(gid) = config.gid {
            map.insert(KEY_GID.into(), Value::String(gid));
        }
        map
    }
}

/// Ownership target for `chown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub uid: Option<String>,
    pub gid: Option<String>,
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.uid, &self.gid) {
            (Some(uid), Some(gid)) => write!(f, "{}:{}", uid, gid),
            (Some(uid), None) => write!(f, "{}", uid),
            (None, Some(gid)) => write!(f, ":{}", gid),
            (None, None) => Ok(()),
        }
    }
}

/// Permission change applied to a mount directory before mounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionPolicy {
    /// Leave ownership and mode alone
    Preserve,
    /// Change ownership
    Chown(Owner),
    /// `chmod 0777`
    WorldWritable,
}

/// Mode applied by [`PermissionPolicy::WorldWritable`].
pub const WORLD_WRITABLE_MODE: u32 = 0o777;

/// Connection settings for the remote storage API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the storage API (e.g., "http://ubiquity:9999/ubiquity_storage")
    pub storage_api_url: String,
    /// Backend name used as the first path segment
    pub backend: String,
    /// NFS client export specification sent with every create request
    pub client_config: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            storage_api_url: "http://localhost:9999/ubiquity_storage".to_string(),
            backend: "spectrum-scale-nfs".to_string(),
            client_config: String::new(),
            request_timeout_secs: 30,
        }
    }
}

impl RemoteConfig {
    /// Check required fields.
    pub fn validate(&self) -> Result<()> {
        if self.storage_api_url.is_empty() {
            return Err(DriverError::InvalidConfig("storage_api_url is required".into()));
        }
        if self.backend.is_empty() {
            return Err(DriverError::InvalidConfig("backend is required".into()));
        }
        if self.client_config.is_empty() {
            return Err(DriverError::InvalidConfig("client_config is required".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(DriverError::InvalidConfig("request_timeout_secs must be greater than 0".into()));
        }
        Ok(())
    }

    /// Request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Local mount settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Directory under which shares are mounted
    pub root: PathBuf,
    /// Prefix privileged commands with sudo
    pub use_sudo: bool,
    /// NFS mount options (e.g., "vers=4.1,soft,timeo=100")
    pub options: String,
    /// Per-command timeout in seconds
    pub command_timeout_secs: u64,
    /// Mount table to probe
    pub mounts_file: PathBuf,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/mnt"),
            use_sudo: true,
            options: String::new(),
            command_timeout_secs: 60,
            mounts_file: PathBuf::from("/proc/mounts"),
        }
    }
}

impl MountConfig {
    /// Check required fields.
    pub fn validate(&self) -> Result<()> {
        if !self.root.is_absolute() {
            return Err(DriverError::InvalidConfig(format!(
                "mount root {} must be an absolute path",
                self.root.display()
            )));
        }
        if self.command_timeout_secs == 0 {
            return Err(DriverError::InvalidConfig("command_timeout_secs must be greater than 0".into()));
        }
        Ok(())
    }

    /// Command timeout as a duration.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}
