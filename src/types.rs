//! Data types for AMD GPU process accounting

use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

/// PCI vendor ID of AMD devices
pub const AMD_VENDOR_ID: u16 = 0x1002;

/// Longest process name the kernel keeps in `comm` (TASK_COMM_LEN minus the NUL)
pub const COMM_MAX_LEN: usize = 15;

/// Kernel driver bound to a GPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuDriver {
    /// The `amdgpu` DRM driver
    Amdgpu,
    /// The legacy `radeon` DRM driver (no fdinfo accounting)
    Radeon,
}

impl GpuDriver {
    /// Map a kernel module name to a driver
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "amdgpu" => Some(GpuDriver::Amdgpu),
            "radeon" => Some(GpuDriver::Radeon),
            _ => None,
        }
    }

    /// Kernel module name of this driver
    pub fn name(&self) -> &'static str {
        match self {
            GpuDriver::Amdgpu => "amdgpu",
            GpuDriver::Radeon => "radeon",
        }
    }
}

impl fmt::Display for GpuDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Information about a detected AMD GPU
#[derive(Debug, Clone)]
pub struct GpuInfo {
    /// Card identifier (e.g., "card0")
    pub id: String,
    /// sysfs directory of the card (e.g., /sys/class/drm/card0)
    pub sysfs_path: PathBuf,
    /// PCI slot name (e.g., "0000:03:00.0") if the device link resolved
    pub pci_slot: Option<String>,
    /// PCI vendor ID (0x1002 for AMD)
    pub vendor_id: u16,
    /// PCI device ID
    pub device_id: u16,
    /// PCI revision ID, when exposed
    pub revision_id: Option<u8>,
    /// Bound kernel driver, if recognized
    pub driver: Option<GpuDriver>,
    /// DRM minor of the primary node (`cardN`)
    pub card_minor: u32,
    /// DRM minor of the render node (`renderD(128+N)`), if present
    pub render_minor: Option<u32>,
    /// DRM render node path (e.g., /dev/dri/renderD128)
    pub render_node: Option<String>,
    /// DRM card node path (e.g., /dev/dri/card0)
    pub card_node: Option<String>,
}

impl GpuInfo {
    /// Returns true if this is an AMD GPU
    pub fn is_amd(&self) -> bool {
        self.vendor_id == AMD_VENDOR_ID
    }

    /// Returns true if the amdgpu driver (and with it fdinfo accounting) is bound
    pub fn has_fdinfo_accounting(&self) -> bool {
        self.driver == Some(GpuDriver::Amdgpu)
    }
}

/// Cumulative busy time per engine, in nanoseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineCounters {
    /// Graphics engine busy time
    pub gfx_ns: u64,
    /// Compute engine busy time
    pub compute_ns: u64,
    /// Video encode engine busy time
    pub encode_ns: u64,
    /// Video decode engine busy time
    pub decode_ns: u64,
}

impl EngineCounters {
    /// Create counters from the four engine totals
    pub fn new(gfx_ns: u64, compute_ns: u64, encode_ns: u64, decode_ns: u64) -> Self {
        Self {
            gfx_ns,
            compute_ns,
            encode_ns,
            decode_ns,
        }
    }
}

/// Engine utilization of one process over the last sampling interval
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngineUsage {
    /// Graphics engine busy percentage (0.0 - 100.0)
    pub gfx_percent: f64,
    /// Compute engine busy percentage (0.0 - 100.0)
    pub compute_percent: f64,
    /// Video encode engine busy percentage (0.0 - 100.0)
    pub encode_percent: f64,
    /// Video decode engine busy percentage (0.0 - 100.0)
    pub decode_percent: f64,
}

impl EngineUsage {
    /// Add another context's usage, saturating each engine at 100%
    pub fn accumulate(&mut self, other: EngineUsage) {
        self.gfx_percent = (self.gfx_percent + other.gfx_percent).min(100.0);
        self.compute_percent = (self.compute_percent + other.compute_percent).min(100.0);
        self.encode_percent = (self.encode_percent + other.encode_percent).min(100.0);
        self.decode_percent = (self.decode_percent + other.decode_percent).min(100.0);
    }

    /// Returns the maximum utilization across all engines
    pub fn max_utilization(&self) -> f64 {
        self.gfx_percent
            .max(self.compute_percent)
            .max(self.encode_percent)
            .max(self.decode_percent)
    }

    /// Returns the media utilization (encode and decode combined)
    pub fn media_utilization(&self) -> f64 {
        self.encode_percent.max(self.decode_percent)
    }

    /// Returns true if every engine is idle
    pub fn is_idle(&self) -> bool {
        self.max_utilization() < 0.1
    }
}

/// GPU usage of one process on one device, produced once per scan
#[derive(Debug, Clone)]
pub struct ProcessUsage {
    /// Process ID
    pub pid: u32,
    /// Process name from `comm`, at most [`COMM_MAX_LEN`] bytes
    pub name: String,
    /// Identifier of the device this usage was measured on
    pub device_id: String,
    /// Engine utilization since the previous scan
    pub engines: EngineUsage,
    /// VRAM resident bytes
    pub vram_bytes: u64,
    /// Whether the process runs on the compute (HIP/HSA) runtime
    pub is_compute_stack: bool,
    /// Number of distinct GPU contexts folded into this record
    pub contexts: usize,
    /// When the scan producing this record started
    pub timestamp: Instant,
}

/// Result of one full accounting scan
#[derive(Debug, Clone)]
pub struct ProcessScan {
    /// When the scan started; every rate in it is relative to this instant
    pub timestamp: Instant,
    /// One record per GPU-using (process, device) pair, in discovery order
    pub processes: Vec<ProcessUsage>,
    /// Indices of devices that could not produce an identifier this scan
    pub unavailable_devices: Vec<usize>,
}

impl ProcessScan {
    /// Create an empty scan result
    pub fn new(timestamp: Instant) -> Self {
        Self {
            timestamp,
            processes: Vec::new(),
            unavailable_devices: Vec::new(),
        }
    }

    /// Returns true if no process uses any monitored GPU
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Iterate over the records of one device
    pub fn for_device<'a>(&'a self, device_id: &'a str) -> impl Iterator<Item = &'a ProcessUsage> {
        self.processes
            .iter()
            .filter(move |p| p.device_id == device_id)
    }

    /// Sort records by graphics usage, busiest first
    pub fn sort_by_gfx(&mut self) {
        self.processes.sort_by(|a, b| {
            b.engines
                .gfx_percent
                .total_cmp(&a.engines.gfx_percent)
                .then(a.pid.cmp(&b.pid))
        });
    }

    /// Total VRAM attributed to processes in this scan
    pub fn total_vram_bytes(&self) -> u64 {
        self.processes
            .iter()
            .fold(0u64, |acc, p| acc.saturating_add(p.vram_bytes))
    }
}
