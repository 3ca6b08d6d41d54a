//! Linux implementation: per-process accounting from amdgpu DRM fdinfo
//!
//! The engine walks `/proc`, finds file descriptors that point at DRM nodes
//! of the monitored GPUs, parses their fdinfo and turns the cumulative
//! engine counters into utilization against the previous scan.

pub mod cache;
pub mod classify;
pub mod device;
pub mod fdinfo;
pub mod procfs;

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::{MonitorConfig, MIN_INTERVAL};
use crate::error::{Error, Result};
use crate::types::*;

use cache::{CacheKey, UsageCache};
use device::GpuDevice;
use fdinfo::RawAccountingSample;
use procfs::ProcFs;

/// Handle for controlling background sampling
pub struct SamplingHandle {
    stop_tx: Option<Sender<()>>,
    latest: Arc<RwLock<Arc<ProcessScan>>>,
    thread: Option<JoinHandle<()>>,
}

impl SamplingHandle {
    /// Stop the background sampling, letting an in-flight scan finish
    pub fn stop(mut self) {
        self.shutdown();
    }

    /// Check if sampling is still running
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// The most recently completed scan
    pub fn latest(&self) -> Arc<ProcessScan> {
        Arc::clone(&self.latest.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Copy of the current process usage list
    pub fn processes(&self) -> Vec<ProcessUsage> {
        self.latest().processes.clone()
    }

    fn shutdown(&mut self) {
        // Dropping the sender wakes the sampling loop immediately
        self.stop_tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("sampling thread panicked");
            }
        }
    }
}

impl Drop for SamplingHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Per-process GPU accounting engine
///
/// Owns the counters of the previous scan; each scan replaces them.
pub struct ProcessAccountingEngine {
    config: MonitorConfig,
    procfs: ProcFs,
    cache: UsageCache,
}

impl ProcessAccountingEngine {
    /// Create an engine with the default configuration
    pub fn new() -> Self {
        Self::from_valid_config(MonitorConfig::default())
    }

    /// Create an engine with a custom configuration
    pub fn with_config(config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: MonitorConfig) -> Self {
        let procfs = ProcFs::new(config.proc_root.clone());
        Self {
            config,
            procfs,
            cache: UsageCache::new(),
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Number of contexts remembered from the previous scan
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Scan all processes against `devices` now
    pub fn scan<D: GpuDevice>(&mut self, devices: &[D]) -> Result<ProcessScan> {
        self.scan_at(devices, Instant::now())
    }

    /// Scan all processes, computing rates relative to `now`
    ///
    /// Fails only when the process table itself cannot be listed; the
    /// previous counters are kept in that case.
    pub fn scan_at<D: GpuDevice>(&mut self, devices: &[D], now: Instant) -> Result<ProcessScan> {
        let mut scan = ProcessScan::new(now);

        let mut device_ids: Vec<Option<String>> = Vec::with_capacity(devices.len());
        for (index, device) in devices.iter().enumerate() {
            match device.stable_id() {
                Ok(id) => device_ids.push(Some(id)),
                Err(e) => {
                    tracing::warn!(device = index, error = %e, "device unavailable, skipping its processes");
                    scan.unavailable_devices.push(index);
                    device_ids.push(None);
                }
            }
        }

        let pids = self.procfs.pids().map_err(|source| Error::ProcUnavailable {
            path: self.procfs.root().to_path_buf(),
            source,
        })?;

        let mut next = UsageCache::with_capacity(self.cache.len());

        for pid in pids {
            let Some(found) = self.collect_samples(pid, devices, &device_ids) else {
                continue;
            };

            let is_compute_stack = classify::is_compute_stack(
                &self.procfs,
                pid,
                found.saw_pasid,
                &self.config.compute_runtime_libs,
            );

            let name = match self.procfs.read_comm(pid) {
                Ok(name) => name,
                Err(e) => {
                    tracing::trace!(pid, error = %e, "process exited during scan");
                    continue;
                }
            };

            for (index, samples) in found.per_device.into_iter().enumerate() {
                let Some(device_id) = device_ids[index].as_deref() else {
                    continue;
                };
                if samples.is_empty() {
                    continue;
                }

                let contexts = fdinfo::fold_contexts(samples);
                let mut engines = EngineUsage::default();
                let mut vram_bytes = 0u64;

                for context in &contexts {
                    let key = CacheKey::new(pid, device_id, context.context);
                    engines.accumulate(cache::engine_usage(
                        self.cache.get(&key),
                        &context.counters,
                        now,
                    ));
                    vram_bytes = vram_bytes.saturating_add(context.vram_bytes);
                    next.insert(key, context.counters, now);
                }

                scan.processes.push(ProcessUsage {
                    pid,
                    name: name.clone(),
                    device_id: device_id.to_string(),
                    engines,
                    vram_bytes,
                    is_compute_stack,
                    contexts: contexts.len(),
                    timestamp: now,
                });
            }
        }

        tracing::debug!(
            processes = scan.processes.len(),
            contexts = next.len(),
            dropped = self.cache.len().saturating_sub(next.len()),
            "process scan complete"
        );
        self.cache = next;

        Ok(scan)
    }

    /// Read and parse the fdinfo of every DRM handle of `pid`
    ///
    /// Returns None if the process has no accounting signal on any device.
    fn collect_samples<D: GpuDevice>(
        &self,
        pid: u32,
        devices: &[D],
        device_ids: &[Option<String>],
    ) -> Option<ProcessSamples> {
        let handles = match self.procfs.drm_handles(pid, self.config.drm_major) {
            Ok(handles) => handles,
            Err(e) => {
                tracing::trace!(pid, error = %e, "cannot list file descriptors");
                return None;
            }
        };
        if handles.is_empty() {
            return None;
        }

        let mut found = ProcessSamples {
            per_device: vec![Vec::new(); devices.len()],
            saw_pasid: false,
        };

        for handle in handles {
            let Some(index) = devices.iter().position(|d| d.owns_minor(handle.minor)) else {
                continue;
            };
            if device_ids[index].is_none() {
                continue;
            }

            let text = match self.procfs.read_fdinfo(pid, &handle.fd) {
                Ok(text) => text,
                Err(e) => {
                    tracing::trace!(pid, fd = %handle.fd, error = %e, "fdinfo unreadable");
                    continue;
                }
            };

            let parsed = fdinfo::parse_fdinfo(&text);
            if !parsed.sample.is_amdgpu() {
                continue;
            }
            if parsed.sample.pasid.is_some() {
                found.saw_pasid = true;
            }
            if parsed.has_signal {
                found.per_device[index].push(parsed.sample);
            }
        }

        found
            .per_device
            .iter()
            .any(|samples| !samples.is_empty())
            .then_some(found)
    }

    /// Start scanning in a background thread
    ///
    /// The first scan runs immediately; later scans run every `interval`
    /// (never less than 100 ms). `callback` sees every completed scan, and
    /// the handle always exposes the latest one.
    pub fn start_sampling<D, F>(
        mut self,
        devices: Vec<D>,
        interval: Duration,
        mut callback: F,
    ) -> Result<SamplingHandle>
    where
        D: GpuDevice + Send + 'static,
        F: FnMut(&ProcessScan) + Send + 'static,
    {
        let interval = interval.max(MIN_INTERVAL);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let latest = Arc::new(RwLock::new(Arc::new(ProcessScan::new(Instant::now()))));
        let published = Arc::clone(&latest);

        let thread = thread::Builder::new()
            .name("amdgpu-process-sampler".to_string())
            .spawn(move || loop {
                match self.scan(devices.as_slice()) {
                    Ok(scan) => {
                        callback(&scan);
                        let scan = Arc::new(scan);
                        *published.write().unwrap_or_else(PoisonError::into_inner) = scan;
                    }
                    Err(e) => tracing::warn!(error = %e, "process scan failed"),
                }

                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|source| Error::SamplingThread { source })?;

        Ok(SamplingHandle {
            stop_tx: Some(stop_tx),
            latest,
            thread: Some(thread),
        })
    }
}

impl Default for ProcessAccountingEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Samples of one process, grouped by device index
struct ProcessSamples {
    per_device: Vec<Vec<RawAccountingSample>>,
    saw_pasid: bool,
}
