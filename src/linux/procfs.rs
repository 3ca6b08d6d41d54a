//! Process filesystem access for DRM handle discovery
//!
//! Every read here races with process exit and may be refused for other
//! users' processes. Callers treat IO errors as "skip this process/handle".

use std::fs::{self, Metadata};
use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};

use crate::types::COMM_MAX_LEN;

/// An open file descriptor pointing at a DRM node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrmHandle {
    /// File descriptor number as listed under `fd/`
    pub fd: String,
    /// Minor number of the DRM node
    pub minor: u32,
}

/// Returns the DRM minor if `meta` describes a character device with `major`
pub fn drm_minor(meta: &Metadata, major: u32) -> Option<u32> {
    if !meta.file_type().is_char_device() {
        return None;
    }
    let rdev = meta.rdev();
    (libc::major(rdev) == major).then_some(libc::minor(rdev))
}

/// Reader over a process filesystem rooted at `root`
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl ProcFs {
    /// Create a reader for the given root (normally `/proc`)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root of this process filesystem
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn pid_path(&self, pid: u32) -> PathBuf {
        self.root.join(pid.to_string())
    }

    /// List the IDs of all processes
    pub fn pids(&self) -> io::Result<Vec<u32>> {
        let mut pids: Vec<u32> = fs::read_dir(&self.root)?
            .flatten()
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }

    /// List the handles of `pid` that point at a character device with `major`
    pub fn drm_handles(&self, pid: u32, major: u32) -> io::Result<Vec<DrmHandle>> {
        let fd_dir = self.pid_path(pid).join("fd");
        let mut handles = Vec::new();

        for entry in fs::read_dir(&fd_dir)?.flatten() {
            let fd = entry.file_name().to_string_lossy().into_owned();
            if !fd.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }

            // stat follows the fd link to the device node
            let meta = match fs::metadata(entry.path()) {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            if let Some(minor) = drm_minor(&meta, major) {
                handles.push(DrmHandle { fd, minor });
            }
        }

        Ok(handles)
    }

    /// Read the accounting text of one handle
    pub fn read_fdinfo(&self, pid: u32, fd: &str) -> io::Result<String> {
        fs::read_to_string(self.pid_path(pid).join("fdinfo").join(fd))
    }

    /// Read the short process name, truncated to the kernel's comm length
    pub fn read_comm(&self, pid: u32) -> io::Result<String> {
        let comm = fs::read_to_string(self.pid_path(pid).join("comm"))?;
        Ok(truncate_comm(comm.trim_end_matches('\n')))
    }

    /// Read the memory map listing of a process
    pub fn read_maps(&self, pid: u32) -> io::Result<String> {
        fs::read_to_string(self.pid_path(pid).join("maps"))
    }
}

fn truncate_comm(name: &str) -> String {
    if name.len() <= COMM_MAX_LEN {
        return name.to_string();
    }
    let mut end = COMM_MAX_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}
