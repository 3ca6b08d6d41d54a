//! Example: Per-process AMD GPU monitor
//!
//! Samples every second and prints the processes using the GPU, busiest
//! first. Set RUST_LOG=amdgpu_process_stats=debug to see scan summaries.
//!
//! Run with: cargo run --example monitor
//!
//! Note: other users' processes are only visible when running as root

use amdgpu_process_stats::{discover_gpus, MonitorConfig, ProcessAccountingEngine, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = MonitorConfig::default().with_interval(Duration::from_secs(1));
    let gpus = discover_gpus(&config.sysfs_drm_root)?;
    for gpu in &gpus {
        println!(
            "Monitoring {} ({})",
            gpu.id,
            gpu.pci_slot.as_deref().unwrap_or("unknown slot")
        );
    }

    let interval = config.effective_interval();
    let engine = ProcessAccountingEngine::with_config(config)?;

    let first = Arc::new(AtomicBool::new(true));
    let handle = engine.start_sampling(gpus, interval, move |scan| {
        // The first scan has no previous counters to compare against
        if first.swap(false, Ordering::SeqCst) {
            return;
        }

        let mut scan = scan.clone();
        scan.sort_by_gfx();

        print!("\x1B[2J\x1B[H");
        println!(
            "{:>7} {:<15} {:>6} {:>6} {:>6} {:>10}  {}",
            "PID", "NAME", "GFX%", "COMP%", "MEDIA%", "VRAM", "DEVICE"
        );
        for p in &scan.processes {
            println!(
                "{:>7} {:<15} {:>6.1} {:>6.1} {:>6.1} {:>8}Mi  {}{}",
                p.pid,
                p.name,
                p.engines.gfx_percent,
                p.engines.compute_percent,
                p.engines.media_utilization(),
                p.vram_bytes / (1024 * 1024),
                p.device_id,
                if p.is_compute_stack { " [ROCm]" } else { "" }
            );
        }
        println!(
            "{} processes, {} MiB VRAM in total",
            scan.processes.len(),
            scan.total_vram_bytes() / (1024 * 1024)
        );
        for index in &scan.unavailable_devices {
            println!("GPU #{} unavailable", index);
        }
    })?;

    println!("Press Ctrl+C to exit");
    while handle.is_running() {
        std::thread::sleep(Duration::from_millis(500));
    }

    Ok(())
}
