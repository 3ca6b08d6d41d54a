//! AMD GPU discovery through the DRM sysfs class
//!
//! Each `cardN` directory under `/sys/class/drm` links to its PCI device.
//! The `dev` attribute of the card and of its render node give the DRM
//! minors that process handles are matched against.

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::{GpuDriver, GpuInfo};

/// A monitored GPU as seen by the process accounting engine
pub trait GpuDevice {
    /// Identifier that stays the same across scans
    ///
    /// Fails when the device is currently unavailable; the engine then
    /// attributes no processes to it for that scan.
    fn stable_id(&self) -> Result<String>;

    /// Whether a DRM node with this minor belongs to the device
    fn owns_minor(&self, minor: u32) -> bool;
}

impl GpuDevice for GpuInfo {
    fn stable_id(&self) -> Result<String> {
        if !self.sysfs_path.exists() {
            return Err(Error::GpuUnavailable {
                device: self.id.clone(),
            });
        }
        Ok(self.pci_slot.clone().unwrap_or_else(|| self.id.clone()))
    }

    fn owns_minor(&self, minor: u32) -> bool {
        self.card_minor == minor || self.render_minor == Some(minor)
    }
}

impl<T: GpuDevice + ?Sized> GpuDevice for &T {
    fn stable_id(&self) -> Result<String> {
        (**self).stable_id()
    }

    fn owns_minor(&self, minor: u32) -> bool {
        (**self).owns_minor(minor)
    }
}

/// Parse a hex ("0x1002") or decimal sysfs value
fn parse_hex_or_dec(s: &str) -> Option<u64> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

/// Parse the minor out of a `dev` attribute ("226:128")
fn parse_dev_minor(s: &str) -> Option<u32> {
    s.trim().split_once(':')?.1.parse().ok()
}

/// Discover AMD GPUs under a DRM class directory (normally /sys/class/drm)
pub fn discover_gpus(drm_root: &Path) -> Result<Vec<GpuInfo>> {
    if !drm_root.exists() {
        return Err(Error::NoGpuFound);
    }

    let entries = fs::read_dir(drm_root).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            Error::permission_denied(&e)
        } else {
            Error::NoGpuFound
        }
    })?;

    let mut gpus = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();

        // Only look at card entries (not renderD* or connectors like card0-DP-1)
        if !name.starts_with("card") || name.contains('-') {
            continue;
        }

        match read_gpu_info(&entry.path(), &name) {
            Ok(gpu) if gpu.is_amd() => gpus.push(gpu),
            Ok(_) => {}
            Err(e) => tracing::debug!(card = %name, error = %e, "skipping DRM card"),
        }
    }

    if gpus.is_empty() {
        return Err(Error::NoGpuFound);
    }

    gpus.sort_by_key(|g| g.card_minor);
    Ok(gpus)
}

/// Find one AMD GPU by card id (e.g., "card1")
pub fn find_gpu(drm_root: &Path, card_id: &str) -> Result<GpuInfo> {
    discover_gpus(drm_root)?
        .into_iter()
        .find(|g| g.id == card_id)
        .ok_or_else(|| Error::DeviceNotFound {
            path: drm_root.join(card_id),
        })
}

fn read_id(path: &Path, what: &str) -> Result<u16> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::sysfs_parse(path, format!("failed to read {}: {}", what, e)))?;
    parse_hex_or_dec(text.trim())
        .and_then(|v| u16::try_from(v).ok())
        .ok_or_else(|| Error::sysfs_parse(path, format!("invalid {} id", what)))
}

/// Read GPU information from sysfs
fn read_gpu_info(card_path: &Path, card_id: &str) -> Result<GpuInfo> {
    let device_path = card_path.join("device");

    let vendor_id = read_id(&device_path.join("vendor"), "vendor")?;
    let device_id = read_id(&device_path.join("device"), "device")?;
    let revision_id = fs::read_to_string(device_path.join("revision"))
        .ok()
        .and_then(|s| parse_hex_or_dec(s.trim()))
        .and_then(|v| u8::try_from(v).ok());

    let dev_path = card_path.join("dev");
    let card_minor = fs::read_to_string(&dev_path)
        .ok()
        .and_then(|s| parse_dev_minor(&s))
        .or_else(|| card_id.strip_prefix("card")?.parse().ok())
        .ok_or_else(|| Error::sysfs_parse(&dev_path, "no DRM minor"))?;

    let pci_slot = fs::read_link(&device_path)
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()));

    let driver = fs::read_link(device_path.join("driver"))
        .ok()
        .and_then(|p| p.file_name().and_then(|n| GpuDriver::from_name(&n.to_string_lossy())));

    let render_minor = find_render_minor(&device_path);
    let render_node = render_minor
        .map(|m| format!("/dev/dri/renderD{}", m))
        .filter(|p| Path::new(p).exists());
    let card_node = Some(format!("/dev/dri/card{}", card_minor)).filter(|p| Path::new(p).exists());

    Ok(GpuInfo {
        id: card_id.to_string(),
        sysfs_path: card_path.to_path_buf(),
        pci_slot,
        vendor_id,
        device_id,
        revision_id,
        driver,
        card_minor,
        render_minor,
        render_node,
        card_node,
    })
}

/// Find the render node minor listed under the PCI device's drm directory
fn find_render_minor(device_path: &Path) -> Option<u32> {
    let entries = fs::read_dir(device_path.join("drm")).ok()?;
    entries.flatten().find_map(|entry| {
        let name = entry.file_name().to_string_lossy().to_string();
        let number = name.strip_prefix("renderD")?;
        fs::read_to_string(entry.path().join("dev"))
            .ok()
            .and_then(|s| parse_dev_minor(&s))
            .or_else(|| number.parse().ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    fn fake_card(root: &Path, card: &str, minor: u32, vendor: &str, slot: &str) {
        let pci = root.join("devices").join(slot);
        fs::create_dir_all(pci.join("drm").join(format!("renderD{}", 128 + minor))).unwrap();
        fs::write(pci.join("vendor"), format!("{}\n", vendor)).unwrap();
        fs::write(pci.join("device"), "0x744c\n").unwrap();
        fs::write(pci.join("revision"), "0xc8\n").unwrap();
        fs::write(
            pci.join("drm").join(format!("renderD{}", 128 + minor)).join("dev"),
            format!("226:{}\n", 128 + minor),
        )
        .unwrap();

        let drm = root.join("drm");
        let card_dir = drm.join(card);
        fs::create_dir_all(&card_dir).unwrap();
        fs::write(card_dir.join("dev"), format!("226:{}\n", minor)).unwrap();
        symlink(&pci, card_dir.join("device")).unwrap();
        fs::create_dir_all(drm.join(format!("{}-DP-1", card))).unwrap();
    }

    #[test]
    fn test_parse_hex_or_dec() {
        assert_eq!(parse_hex_or_dec("0x1002"), Some(0x1002));
        assert_eq!(parse_hex_or_dec("42"), Some(42));
        assert_eq!(parse_hex_or_dec("zz"), None);
        assert_eq!(parse_dev_minor("226:128\n"), Some(128));
        assert_eq!(parse_dev_minor("226"), None);
    }

    #[test]
    fn test_discover_amd_only() {
        let root = tempfile::tempdir().unwrap();
        fake_card(root.path(), "card1", 1, "0x1002", "0000:03:00.0");
        fake_card(root.path(), "card0", 0, "0x8086", "0000:00:02.0");

        let gpus = discover_gpus(&root.path().join("drm")).unwrap();
        assert_eq!(gpus.len(), 1);
        let gpu = &gpus[0];
        assert_eq!(gpu.id, "card1");
        assert_eq!(gpu.device_id, 0x744c);
        assert_eq!(gpu.revision_id, Some(0xc8));
        assert_eq!(gpu.pci_slot.as_deref(), Some("0000:03:00.0"));
        assert_eq!(gpu.card_minor, 1);
        assert_eq!(gpu.render_minor, Some(129));
        assert!(gpu.owns_minor(129));
        assert!(gpu.owns_minor(1));
        assert!(!gpu.owns_minor(128));
        assert_eq!(gpu.stable_id().unwrap(), "0000:03:00.0");
    }

    #[test]
    fn test_find_gpu_and_unavailable() {
        let root = tempfile::tempdir().unwrap();
        fake_card(root.path(), "card0", 0, "0x1002", "0000:03:00.0");
        let drm = root.path().join("drm");

        assert!(matches!(
            find_gpu(&drm, "card7"),
            Err(Error::DeviceNotFound { .. })
        ));
        let gpu = find_gpu(&drm, "card0").unwrap();

        fs::remove_file(drm.join("card0").join("device")).unwrap();
        fs::remove_file(drm.join("card0").join("dev")).unwrap();
        fs::remove_dir(drm.join("card0")).unwrap();
        let err = gpu.stable_id().unwrap_err();
        assert!(err.is_gpu_missing());
    }

    #[test]
    fn test_no_drm_root() {
        let root = tempfile::tempdir().unwrap();
        assert!(matches!(
            discover_gpus(&root.path().join("missing")),
            Err(Error::NoGpuFound)
        ));
    }
}
