//! Error types for the volume driver.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during driver operations.
///
/// Every variant is fatal to the operation that produced it; nothing is
/// retried internally.
#[derive(Error, Debug)]
pub enum DriverError {
    /// The storage API answered with a non-success status.
    #[error("{operation} remote call failed with status {status}: {message}")]
    RemoteCall {
        operation: &'static str,
        status: u16,
        message: String,
    },

    /// The storage API could not be reached or the request did not complete.
    #[error("{operation} remote call failed: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },

    /// A remote response is missing a required field or has the wrong shape.
    #[error("Malformed volume metadata: {0}")]
    MalformedMetadata(String),

    /// A local command exited non-zero or could not be spawned.
    #[error("Command `{command}` failed: {output}")]
    LocalCommand { command: String, output: String },

    /// Local and remote state disagree in a way that makes proceeding unsafe.
    #[error("Inconsistent volume state: {0}")]
    StateInconsistency(String),

    /// A remote call or local command exceeded its time bound.
    #[error("{operation} timed out after {}s", after.as_secs())]
    Timeout {
        operation: String,
        after: Duration,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;
