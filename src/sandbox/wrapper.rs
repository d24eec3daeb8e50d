//! Restricted busybox inside the sandbox
//!
//! Installer scripts call `mount` and `umount` through busybox. Inside the
//! sandbox everything is already mounted, and a script-initiated mount could
//! reach outside it, so those applets become no-ops. `unzip` is handed to a
//! dedicated helper; everything else goes to the original busybox.

use std::fs;
use std::path::Path;

use crate::common::fs::{CopyOptions, copy_file, set_mode};
use crate::config::EXECUTABLE_MODE;
use crate::error::{Result, resource};

/// Name the original busybox is moved to
pub const BUSYBOX_ORIG: &str = "busybox_orig";

pub const BUSYBOX_SHIM: &str = r#"#!/sbin/busybox_orig sh

do_mount() {
    echo "mount command disabled in chroot environment" >&2
    exit 0
}

do_umount() {
    echo "umount command disabled in chroot environment" >&2
    exit 0
}

do_unzip() {
    /sbin/unzip "${@}"
    exit "${?}"
}

argv0="${0##*/}"
tool=""

if [ "x${argv0}" = "xbusybox" ]; then
    tool="${1}"
    shift
else
    tool="${argv0}"
fi

case "${tool}" in
    mount) do_mount ;;
    umount) do_umount ;;
    unzip) do_unzip "${@}" ;;
esac

/sbin/busybox_orig "${tool}" "${@}"
exit "${?}"
"#;

/// Replace `sbin/busybox` with the shim.
///
/// Returns `false` when there is no busybox to wrap.
pub fn install_busybox_shim(sbin: &Path) -> Result<bool> {
    let busybox = sbin.join("busybox");
    if fs::symlink_metadata(&busybox).is_err() {
        log::warn!("{} not found; skipping busybox shim", busybox.display());
        return Ok(false);
    }

    let original = sbin.join(BUSYBOX_ORIG);
    fs::rename(&busybox, &original).map_err(resource::with("rename", &busybox))?;
    fs::write(&busybox, BUSYBOX_SHIM).map_err(resource::with("write", &busybox))?;
    set_mode(&busybox, EXECUTABLE_MODE).map_err(resource::with("chmod", &busybox))?;
    Ok(true)
}

/// Put the staged unzip helper at `sbin/unzip`, replacing any existing one
pub fn install_unzip(staged: &Path, sbin: &Path) -> Result<()> {
    let target = sbin.join("unzip");
    if fs::symlink_metadata(&target).is_ok() {
        fs::remove_file(&target).map_err(resource::with("remove", &target))?;
    }
    copy_file(staged, &target, CopyOptions::default()).map_err(resource::with("copy", &target))?;
    set_mode(&target, EXECUTABLE_MODE).map_err(resource::with("chmod", &target))
}
