//! ROCm compute process detection
//!
//! HIP/HSA processes account their work through KFD rather than the DRM
//! engine counters. A process is treated as one only when it has the
//! runtime mapped *and* one of its DRM handles carries a PASID.

use super::procfs::ProcFs;

/// Returns true if a memory map listing references any of `libs`
pub fn maps_reference_runtime(maps: &str, libs: &[String]) -> bool {
    maps.lines()
        .filter_map(|line| line.split_whitespace().nth(5))
        .any(|path| libs.iter().any(|lib| path.contains(lib.as_str())))
}

/// Classify `pid`; unreadable maps classify as not compute
pub fn is_compute_stack(procfs: &ProcFs, pid: u32, saw_pasid: bool, libs: &[String]) -> bool {
    if !saw_pasid || libs.is_empty() {
        return false;
    }
    match procfs.read_maps(pid) {
        Ok(maps) => maps_reference_runtime(&maps, libs),
        Err(e) => {
            tracing::trace!(pid, error = %e, "maps unreadable, assuming graphics process");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const HIP_MAPS: &str = "\
7f1c2a000000-7f1c2a200000 r-xp 00000000 103:02 1311 /opt/rocm/lib/libamdhip64.so.6.1.40100
7f1c2b000000-7f1c2b100000 r--p 00000000 103:02 1400 /usr/lib/libc.so.6
7ffd1c000000-7ffd1c021000 rw-p 00000000 00:00 0 [stack]
";

    fn libs() -> Vec<String> {
        vec!["libamdhip64".to_string(), "libhsa-runtime64".to_string()]
    }

    #[test]
    fn test_maps_reference_runtime() {
        assert!(maps_reference_runtime(HIP_MAPS, &libs()));
        assert!(!maps_reference_runtime(
            "7f1c2b000000-7f1c2b100000 r--p 00000000 103:02 1400 /usr/lib/libc.so.6\n",
            &libs()
        ));
        // a name in the permission column is not a path
        assert!(!maps_reference_runtime("libamdhip64 x y z w\n", &libs()));
    }

    #[test]
    fn test_both_signals_required() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("10")).unwrap();
        fs::write(root.path().join("10").join("maps"), HIP_MAPS).unwrap();
        let procfs = ProcFs::new(root.path());

        assert!(is_compute_stack(&procfs, 10, true, &libs()));
        assert!(!is_compute_stack(&procfs, 10, false, &libs()));
        assert!(!is_compute_stack(&procfs, 11, true, &libs()));
        assert!(!is_compute_stack(&procfs, 10, true, &[]));
    }
}
