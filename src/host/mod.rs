//! Privileged host operations
//!
//! Everything that touches the global mount table or creates device nodes
//! goes through the [`Host`] trait. [`LinuxHost`] performs the real system
//! calls; tests drive the sandbox against an in-memory mount table.

pub mod linux;
pub mod mounts;

use std::cmp::Reverse;
use std::io;
use std::path::{Path, PathBuf};

pub use linux::LinuxHost;

use crate::common::fs::resolve;
use crate::error::{InstallerError, Result};

/// Upper bound on unmount sweeps before giving up on a busy tree
const UNMOUNT_PASSES: usize = 10;

/// Kind of special file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Char,
    Block,
}

/// A device special file with a fixed major/minor pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceNode {
    pub name: &'static str,
    pub kind: NodeKind,
    pub major: u64,
    pub minor: u64,
    pub mode: u32,
}

/// Mount table and device node operations
pub trait Host {
    /// Mount a fresh, private instance of a virtual filesystem at `target`
    fn mount_virtual(&self, fstype: &str, target: &Path) -> io::Result<()>;

    /// Bind `source` (file or directory) onto `target`
    fn bind_mount(&self, source: &Path, target: &Path) -> io::Result<()>;

    /// Unmount the topmost mount at `target`
    fn unmount(&self, target: &Path) -> io::Result<()>;

    /// Every mount point currently in the table, in mount order
    fn mount_points(&self) -> io::Result<Vec<PathBuf>>;

    /// Create a device special file at `path`
    fn make_node(&self, path: &Path, node: &DeviceNode) -> io::Result<()>;

    /// Whether `path` is itself a mount point
    fn is_mounted(&self, path: &Path) -> io::Result<bool> {
        Ok(self.mount_points()?.iter().any(|p| p == path))
    }
}

/// Whether an unmount error only means nothing was mounted there
pub fn is_not_mounted(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EINVAL | libc::ENOENT))
}

/// Unmount `target`, tolerating "not mounted".
///
/// Returns the error for anything else so the caller can collect it.
pub fn unmount_quietly(host: &dyn Host, target: &Path) -> Option<InstallerError> {
    match host.unmount(target) {
        Ok(()) => {
            log::debug!("Unmounted {}", target.display());
            None
        }
        Err(e) if is_not_mounted(&e) => None,
        Err(e) => Some(crate::error::resource::failed("unmount", target, e)),
    }
}

/// Mount points at or below `root`, deepest first.
///
/// The kernel records absolute, symlink-free paths, so `root` is matched in
/// its resolved form as well.
pub fn mounts_under(host: &dyn Host, root: &Path) -> Result<Vec<PathBuf>> {
    let resolved = resolve(root);
    let mut points: Vec<PathBuf> = host
        .mount_points()
        .map_err(crate::error::resource::with("read mount table for", root))?
        .into_iter()
        .filter(|p| p.starts_with(root) || p.starts_with(&resolved))
        .collect();
    points.sort_by_key(|p| Reverse(p.components().count()));
    Ok(points)
}

/// Unmount everything at or below `root` until the table is clean
pub fn unmount_all(host: &dyn Host, root: &Path) -> Result<()> {
    for _ in 0..UNMOUNT_PASSES {
        let points = mounts_under(host, root)?;
        if points.is_empty() {
            return Ok(());
        }
        for point in points {
            if let Err(e) = host.unmount(&point) {
                log::debug!("Failed to unmount {}: {e}", point.display());
            }
        }
    }

    let remaining = mounts_under(host, root)?;
    if remaining.is_empty() {
        Ok(())
    } else {
        Err(InstallerError::MountsRemain {
            root: root.display().to_string(),
            remaining: remaining
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }
}
