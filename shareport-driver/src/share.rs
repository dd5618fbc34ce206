//! NFS share locators and local mount path derivation.
//!
//! A share locator names an NFS export as `host:/remote/path`. The local mount
//! path for a share is the remote path re-rooted under the driver's mount root,
//! with the host discarded:
//!
//! ```text
//! server1:/export/vol1  +  /mnt   ->   /mnt/export/vol1
//! ```
//!
//! [`ShareLocator::local_path`] is the only place a mount path is computed.
//! Attach and detach both go through it so they always agree on the target.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DriverError, Result};

/// A parsed `host:remotePath` NFS export identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ShareLocator {
    /// Server part, kept verbatim (bracketed for IPv6 literals)
    host: String,
    /// Absolute export path on the server
    remote_path: String,
}

impl ShareLocator {
    /// Parse a locator of the form `host:/path` or `[v6addr]:/path`.
    pub fn parse(locator: &str) -> Result<Self> {
        let malformed =
            |reason: &str| DriverError::MalformedMetadata(format!("share locator '{}' {}", locator, reason));

        let (host, remote_path) = if let Some(rest) = locator.strip_prefix('[') {
            let end = rest
                .find("]:")
                .ok_or_else(|| malformed("has an unterminated IPv6 host"))?;
            (&locator[..end + 2], &rest[end + 2..])
        } else {
            let mut parts = locator.splitn(3, ':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(host), Some(path), None) => (host, path),
                (_, None, _) => return Err(malformed("is missing the host:path separator")),
                _ => return Err(malformed("contains more than one host:path separator")),
            }
        };

        if host.is_empty() || host == "[]" {
            return Err(malformed("has an empty host"));
        }
        if host.chars().any(char::is_whitespace) {
            return Err(malformed("has whitespace in the host"));
        }
        if remote_path.contains(':') {
            return Err(malformed("contains more than one host:path separator"));
        }
        if !remote_path.starts_with('/') {
            return Err(malformed("does not have an absolute remote path"));
        }

        // Canonical form: single separators, no `.` segments, no trailing slash
        let mut normalized = String::with_capacity(remote_path.len());
        for component in Path::new(remote_path).components() {
            match component {
                Component::ParentDir => return Err(malformed("escapes its export with '..'")),
                Component::Normal(part) => {
                    normalized.push('/');
                    normalized.push_str(&part.to_string_lossy());
                }
                _ => {}
            }
        }
        if normalized.is_empty() {
            return Err(malformed("exports the server root, which cannot be mounted below the mount root"));
        }

        Ok(Self {
            host: host.to_string(),
            remote_path: normalized,
        })
    }

    /// Server part of the locator.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Export path on the server.
    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    /// Local mount path for this share under `root`.
    pub fn local_path(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for component in Path::new(&self.remote_path).components() {
            if let Component::Normal(part) = component {
                path.push(part);
            }
        }
        path
    }
}

impl fmt::Display for ShareLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.remote_path)
    }
}

impl FromStr for ShareLocator {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ShareLocator {
    type Error = DriverError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ShareLocator> for String {
    fn from(share: ShareLocator) -> Self {
        share.to_string()
    }
}

/// Derive the local mount path for a raw share locator string.
pub fn derive_local_path(root: &Path, locator: &str) -> Result<PathBuf> {
    Ok(ShareLocator::parse(locator)?.local_path(root))
}
