//! Example: List available AMD GPUs
//!
//! This example shows how to enumerate all AMD GPUs in the system
//! and the DRM nodes process handles are matched against.
//!
//! Run with: cargo run --example list_gpus

use amdgpu_process_stats::{discover_gpus, GpuDevice, MonitorConfig, Result};

fn main() -> Result<()> {
    println!("AMD GPU Discovery");
    println!("=================");
    println!();

    let config = MonitorConfig::default();
    let gpus = match discover_gpus(&config.sysfs_drm_root) {
        Ok(gpus) => gpus,
        Err(e) => {
            eprintln!("Error discovering GPUs: {}", e);

            if e.is_gpu_missing() {
                eprintln!();
                eprintln!("No AMD GPU found. Make sure:");
                eprintln!("  1. You have an AMD GPU");
                eprintln!("  2. The amdgpu driver is loaded (check with: lsmod | grep amdgpu)");
                eprintln!("  3. The DRM subsystem is available (/sys/class/drm exists)");
            }

            return Err(e);
        }
    };

    println!("Found {} AMD GPU(s):", gpus.len());
    println!();

    for (i, gpu) in gpus.iter().enumerate() {
        println!("GPU #{}: {}", i, gpu.id);
        println!("  Device ID:   0x{:04x}", gpu.device_id);
        if let Some(rev) = gpu.revision_id {
            println!("  Revision:    0x{:02x}", rev);
        }
        match gpu.stable_id() {
            Ok(id) => println!("  Identifier:  {}", id),
            Err(e) => println!("  Identifier:  unavailable ({})", e),
        }
        match gpu.driver {
            Some(driver) => println!("  Driver:      {}", driver),
            None => println!("  Driver:      unknown"),
        }
        println!("  Card minor:  {}", gpu.card_minor);
        if let Some(minor) = gpu.render_minor {
            println!("  Render minor: {}", minor);
        }
        if let Some(ref node) = gpu.card_node {
            println!("  Card Node:   {}", node);
        }
        if let Some(ref node) = gpu.render_node {
            println!("  Render Node: {}", node);
        }
        if !gpu.has_fdinfo_accounting() {
            println!("  (no per-process accounting: amdgpu driver not bound)");
        }
        println!();
    }

    Ok(())
}
