//! Real mount table and device node operations

use std::io;
use std::path::{Path, PathBuf};

use nix::mount::{MsFlags, mount, umount};
use nix::sys::stat::{Mode, SFlag, makedev, mknod};

use super::{DeviceNode, Host, NodeKind, mounts};

const PROC_MOUNTS: &str = "/proc/self/mounts";

/// Host operations backed by the kernel
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxHost;

impl Host for LinuxHost {
    fn mount_virtual(&self, fstype: &str, target: &Path) -> io::Result<()> {
        mount(
            Some("none"),
            target,
            Some(fstype),
            MsFlags::empty(),
            None::<&str>,
        )?;
        log::debug!("Mounted {fstype} at {}", target.display());
        Ok(())
    }

    fn bind_mount(&self, source: &Path, target: &Path) -> io::Result<()> {
        mount(
            Some(source),
            target,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )?;
        log::debug!("Bind mounted {} at {}", source.display(), target.display());
        Ok(())
    }

    fn unmount(&self, target: &Path) -> io::Result<()> {
        umount(target)?;
        Ok(())
    }

    fn mount_points(&self) -> io::Result<Vec<PathBuf>> {
        mounts::read(Path::new(PROC_MOUNTS))
    }

    fn make_node(&self, path: &Path, node: &DeviceNode) -> io::Result<()> {
        let kind = match node.kind {
            NodeKind::Char => SFlag::S_IFCHR,
            NodeKind::Block => SFlag::S_IFBLK,
        };
        mknod(
            path,
            kind,
            Mode::from_bits_truncate(node.mode),
            makedev(node.major, node.minor),
        )?;
        Ok(())
    }
}
