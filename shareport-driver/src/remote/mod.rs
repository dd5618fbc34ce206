//! Remote volume service.
//!
//! The storage service owns volume metadata and the attachment records. The
//! driver talks to it through [`RemoteVolumeService`]; [`HttpVolumeService`]
//! is the production implementation.

mod http;

pub use http::*;

use async_trait::async_trait;

use crate::error::Result;
use crate::share::ShareLocator;
use crate::types::{VolumeConfig, VolumeMetadata, VolumeOptions};

/// Remote volume service trait.
///
/// Every call is a single request/response exchange with no local side
/// effects. Failures surface as [`crate::DriverError::RemoteCall`],
/// [`crate::DriverError::Transport`] or [`crate::DriverError::Timeout`].
#[async_trait]
pub trait RemoteVolumeService: Send + Sync {
    /// Activate the backend. Repeated calls after a success are no-ops.
    async fn activate(&self) -> Result<()>;

    /// Create a volume.
    async fn create_volume(&self, name: &str, opts: VolumeOptions) -> Result<()>;

    /// Remove a volume.
    async fn remove_volume(&self, name: &str, force: bool) -> Result<()>;

    /// Fetch a volume's metadata and configuration.
    async fn get_volume(&self, name: &str) -> Result<(VolumeMetadata, VolumeConfig)>;

    /// List all volumes of the backend.
    async fn list_volumes(&self) -> Result<Vec<VolumeMetadata>>;

    /// Record the intent to attach and return the share to mount.
    ///
    /// A missing or malformed share in the response is a
    /// [`crate::DriverError::MalformedMetadata`].
    async fn mark_attached(&self, name: &str) -> Result<ShareLocator>;

    /// Record that the volume is no longer attached.
    async fn mark_detached(&self, name: &str) -> Result<()>;
}
