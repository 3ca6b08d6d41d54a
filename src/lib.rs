//! AMD GPU Per-Process Statistics Library
//!
//! Attributes AMD GPU engine utilization (graphics, compute, video encode,
//! video decode) and VRAM residency to individual processes, the way a
//! process list attributes CPU time.
//!
//! # Platform Support
//!
//! - **Linux**: Via the amdgpu driver's DRM fdinfo accounting in `/proc`
//!
//! # How it works
//!
//! Every open handle to a DRM node has an fdinfo file reporting cumulative
//! busy nanoseconds per engine and the VRAM held by its GPU context. A scan
//! reads those files for every process, counts each context once even when
//! several handles share it, and divides the counter growth since the
//! previous scan by the elapsed time.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use amdgpu_process_stats::{discover_gpus, MonitorConfig, ProcessAccountingEngine};
//! use std::{thread, time::Duration};
//!
//! let config = MonitorConfig::default();
//! let gpus = discover_gpus(&config.sysfs_drm_root)?;
//! let mut engine = ProcessAccountingEngine::with_config(config)?;
//!
//! // The first scan only establishes a baseline
//! engine.scan(&gpus)?;
//! thread::sleep(Duration::from_secs(1));
//!
//! let mut scan = engine.scan(&gpus)?;
//! scan.sort_by_gfx();
//! for p in &scan.processes {
//!     println!("{:>7} {:<15} gfx {:5.1}% vram {} KiB", p.pid, p.name, p.engines.gfx_percent, p.vram_bytes / 1024);
//! }
//! # Ok::<(), amdgpu_process_stats::Error>(())
//! ```
//!
//! # Continuous Sampling
//!
//! ```rust,no_run
//! use amdgpu_process_stats::{discover_gpus, MonitorConfig, ProcessAccountingEngine};
//! use std::time::Duration;
//!
//! let config = MonitorConfig::default();
//! let gpus = discover_gpus(&config.sysfs_drm_root)?;
//! let engine = ProcessAccountingEngine::with_config(config)?;
//!
//! let handle = engine.start_sampling(gpus, Duration::from_millis(500), |scan| {
//!     println!("{} GPU processes", scan.processes.len());
//! })?;
//!
//! std::thread::sleep(Duration::from_secs(5));
//! let processes = handle.processes();
//! println!("last scan saw {} processes", processes.len());
//! handle.stop();
//! # Ok::<(), amdgpu_process_stats::Error>(())
//! ```
//!
//! # Permissions
//!
//! fdinfo of other users' processes is only readable as root (or with
//! `CAP_SYS_PTRACE`); without it those processes are silently skipped.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod types;

#[cfg(target_os = "linux")]
pub mod linux;

// Re-export main types at crate root
pub use config::MonitorConfig;
pub use error::{Error, Result};
pub use types::*;

#[cfg(target_os = "linux")]
pub use linux::device::{discover_gpus, find_gpu, GpuDevice};
#[cfg(target_os = "linux")]
pub use linux::{ProcessAccountingEngine, SamplingHandle};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Check if the current platform is supported
pub fn is_platform_supported() -> bool {
    cfg!(target_os = "linux")
}

/// Get a human-readable description of the current platform support status
pub fn platform_support_status() -> &'static str {
    #[cfg(target_os = "linux")]
    {
        "Linux: Supported via amdgpu DRM fdinfo"
    }

    #[cfg(not(target_os = "linux"))]
    {
        "This platform is not supported"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_platform_support() {
        let status = platform_support_status();
        assert!(!status.is_empty());
        assert_eq!(is_platform_supported(), cfg!(target_os = "linux"));
    }
}
