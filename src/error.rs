//! Error types for amdgpu-process-stats

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for amdgpu-process-stats operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when discovering GPUs or accounting their processes
///
/// Vanished processes, unreadable fdinfo files and malformed fdinfo lines are
/// not errors: a scan skips them.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// No AMD GPU was found on this system
    #[error("No AMD GPU found on this system")]
    NoGpuFound,

    /// The specified GPU device was not found
    #[error("GPU device not found: {path}")]
    DeviceNotFound {
        /// The path that was not found
        path: PathBuf,
    },

    /// Permission denied when listing GPU or process information
    #[error("Permission denied: {message}. Try running as root or adding the user to the 'render' group")]
    PermissionDenied {
        /// Description of the permission error
        message: String,
    },

    /// The process table could not be listed
    #[error("Process table at {path} is unavailable: {source}")]
    ProcUnavailable {
        /// Root of the process filesystem
        path: PathBuf,
        /// The underlying IO error
        source: io::Error,
    },

    /// Error parsing sysfs data
    #[error("Failed to parse sysfs data at {path}: {message}")]
    SysfsParse {
        /// The sysfs path that failed to parse
        path: PathBuf,
        /// Description of the parse error
        message: String,
    },

    /// The device could not produce an identifier for this scan
    #[error("GPU {device} is currently unavailable")]
    GpuUnavailable {
        /// Description of the device (card id or index)
        device: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error
        message: String,
    },

    /// The background sampling thread could not be started
    #[error("Failed to start sampling thread: {source}")]
    SamplingThread {
        /// The underlying IO error
        source: io::Error,
    },
}

impl Error {
    /// Returns true if this error is due to insufficient permissions
    pub fn is_permission_error(&self) -> bool {
        match self {
            Error::PermissionDenied { .. } => true,
            Error::ProcUnavailable { source, .. } => {
                source.kind() == io::ErrorKind::PermissionDenied
            }
            _ => false,
        }
    }

    /// Returns true if the error indicates a missing GPU
    pub fn is_gpu_missing(&self) -> bool {
        matches!(
            self,
            Error::NoGpuFound | Error::DeviceNotFound { .. } | Error::GpuUnavailable { .. }
        )
    }

    /// Create a permission denied error from an IO error
    pub(crate) fn permission_denied(source: &io::Error) -> Self {
        Error::PermissionDenied {
            message: source.to_string(),
        }
    }

    /// Create a sysfs parse error
    pub(crate) fn sysfs_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::SysfsParse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an invalid configuration error
    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        Error::InvalidConfig {
            message: message.into(),
        }
    }
}
