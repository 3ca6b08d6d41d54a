//! Monitor configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Character-device major number of DRM nodes
pub const DRM_MAJOR: u32 = 226;

/// Default sampling interval
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

/// Shortest sampling interval accepted
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Shared objects whose presence in `/proc/<pid>/maps` marks a ROCm compute process
pub const DEFAULT_COMPUTE_RUNTIME_LIBS: &[&str] = &["libamdhip64", "libhsa-runtime64", "libhsakmt"];

/// Configuration for process accounting and sampling
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Root of the process filesystem
    pub proc_root: PathBuf,
    /// DRM class directory used for device discovery
    pub sysfs_drm_root: PathBuf,
    /// Major number identifying GPU handles
    pub drm_major: u32,
    /// Sampling interval; see [`MonitorConfig::effective_interval`]
    pub interval: Duration,
    /// Substrings identifying compute runtime libraries in a memory map
    pub compute_runtime_libs: Vec<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            sysfs_drm_root: PathBuf::from("/sys/class/drm"),
            drm_major: DRM_MAJOR,
            interval: DEFAULT_INTERVAL,
            compute_runtime_libs: DEFAULT_COMPUTE_RUNTIME_LIBS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl MonitorConfig {
    /// Use a different process filesystem root
    pub fn with_proc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.proc_root = root.into();
        self
    }

    /// Use a different DRM sysfs class directory
    pub fn with_sysfs_drm_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_drm_root = root.into();
        self
    }

    /// Match GPU handles against a different device major
    pub fn with_drm_major(mut self, major: u32) -> Self {
        self.drm_major = major;
        self
    }

    /// Set the sampling interval, clamped to [`MIN_INTERVAL`]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_INTERVAL);
        self
    }

    /// Replace the compute runtime library list
    pub fn with_compute_runtime_libs<I, S>(mut self, libs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.compute_runtime_libs = libs.into_iter().map(Into::into).collect();
        self
    }

    /// The interval actually used for sampling
    pub fn effective_interval(&self) -> Duration {
        self.interval.max(MIN_INTERVAL)
    }

    /// Check the configuration for values that would make every scan empty
    pub fn validate(&self) -> Result<()> {
        if self.drm_major == 0 {
            return Err(Error::invalid_config("drm_major must be non-zero"));
        }
        if self.proc_root.as_os_str().is_empty() {
            return Err(Error::invalid_config("proc_root must not be empty"));
        }
        if self.compute_runtime_libs.iter().any(|lib| lib.is_empty()) {
            return Err(Error::invalid_config(
                "compute_runtime_libs entries must not be empty",
            ));
        }
        Ok(())
    }
}
