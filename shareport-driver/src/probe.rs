//! Mount table inspection.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::share::ShareLocator;

/// Answers whether a share is currently mounted at a path.
///
/// Implementations read the live mount table on every call and never mutate
/// anything. A table that cannot be read counts as "not mounted".
#[async_trait]
pub trait MountStateProbe: Send + Sync {
    async fn is_mounted(&self, share: &ShareLocator, path: &Path) -> bool;
}

/// Probe backed by a `/proc/mounts` style file.
pub struct ProcMountsProbe {
    mounts_file: PathBuf,
}

impl ProcMountsProbe {
    /// Probe the given mount table file.
    pub fn new(mounts_file: impl Into<PathBuf>) -> Self {
        Self {
            mounts_file: mounts_file.into(),
        }
    }
}

impl Default for ProcMountsProbe {
    fn default() -> Self {
        Self::new("/proc/mounts")
    }
}

#[async_trait]
impl MountStateProbe for ProcMountsProbe {
    async fn is_mounted(&self, share: &ShareLocator, path: &Path) -> bool {
        let table = match tokio::fs::read_to_string(&self.mounts_file).await {
            Ok(table) => table,
            Err(e) => {
                warn!(
                    mounts_file = %self.mounts_file.display(),
                    error = %e,
                    "Cannot read mount table, assuming not mounted"
                );
                return false;
            }
        };

        let mounted = table_contains(&table, &share.to_string(), path);
        debug!(share = %share, mount_point = %path.display(), mounted, "Probed mount table");
        mounted
    }
}

/// Whether `table` has an entry with exactly this source and target.
pub fn table_contains(table: &str, source: &str, target: &Path) -> bool {
    table.lines().any(|line| {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some(src), Some(dst)) => unescape(src) == source && Path::new(&unescape(dst)) == target,
            _ => false,
        }
    })
}

/// Decode the octal escapes (`\040`, `\011`, `\012`, `\134`) the kernel uses
/// for whitespace and backslashes in mount table fields.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal_escape(&bytes[i + 1..i + 4]) {
            let code = (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(code);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal_escape(digits: &[u8]) -> bool {
    digits.len() == 3
        && (b'0'..=b'3').contains(&digits[0])
        && digits[1..].iter().all(|d| (b'0'..=b'7').contains(d))
}
