//! Fixed paths inside the installer archive and inside the sandbox
//!
//! Sandbox paths are absolute as seen from inside the chroot; join them onto
//! the sandbox root with [`crate::config::Layout::in_sandbox`].

/// Installer script entry that recovery executes (this tool, once patched)
pub const ZIP_UPDATER: &str = "META-INF/com/google/android/update-binary";

/// The original installer script, relocated when the zip was patched
pub const ZIP_UPDATER_ORIG: &str = "META-INF/com/google/android/update-binary.orig";

/// Declared target device id, one line
pub const ZIP_DEVICE: &str = "multiboot/device";

/// Filesystem check-and-repair tool
pub const ZIP_E2FSCK: &str = "multiboot/e2fsck";

/// Filesystem resize tool
pub const ZIP_RESIZE2FS: &str = "multiboot/resize2fs";

/// Unzip helper the shell shim delegates to
pub const ZIP_UNZIP: &str = "multiboot/unzip";

/// Nested archive carrying the interactive slot selector
pub const ZIP_SELECTOR: &str = "multiboot/aromawrapper.zip";

/// Optional ROM registry replacing the builtin slot list
pub const ZIP_ROM_REGISTRY: &str = "multiboot/roms.yaml";

/// Where the selector or real installer is extracted
pub const SANDBOX_UPDATER: &str = "/tmp/updater";

/// Where the selector archive is extracted
pub const SANDBOX_SELECTOR_ZIP: &str = "/tmp/aromawrapper.zip";

/// One-line installation type token written by the selector
pub const SANDBOX_INSTALL_TYPE: &str = "/tmp/installtype";

/// Bind target for the original archive
pub const SANDBOX_INSTALL_ZIP: &str = "/tmp/install.zip";

/// Bind target for an image-backed system partition
pub const SANDBOX_SYSTEM_IMG: &str = "/tmp/system.img";

/// Copy of this executable for the real installer to call back into
pub const SANDBOX_HELPER_TOOL: &str = "/update-binary-tool";

/// Marker denoting an active sandbox
pub const SANDBOX_MARKER: &str = "/.chroot";

/// Selector token meaning the user backed out
pub const CANCELLED_TOKEN: &str = "cancelled";

/// Host-side file names under the staging directory
pub mod staging {
    pub const DEVICE: &str = "device";
    pub const E2FSCK: &str = "e2fsck";
    pub const RESIZE2FS: &str = "resize2fs";
    pub const UNZIP: &str = "unzip";
    pub const ROM_REGISTRY: &str = "roms.yaml";
}
