//! Runtime configuration for one installer invocation
//!
//! Nothing here is persisted. A [`Config`] is assembled once from the command
//! line (with environment overrides) and passed by reference to every step.

use std::fmt;
use std::path::{Path, PathBuf};

/// Default sandbox root
pub const DEFAULT_SANDBOX_ROOT: &str = "/chroot";

/// Default host-side staging directory for extracted tools
pub const DEFAULT_STAGING_DIR: &str = "/tmp";

/// Number of minimize passes run when shrinking an image
pub const SHRINK_PASSES: usize = 5;

/// Mode applied to every staged executable (r-x for all, no write)
pub const EXECUTABLE_MODE: u32 = 0o555;

/// Size of a filesystem image, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize(u64);

impl ImageSize {
    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * 1024 * 1024;

    /// Target capacity for system images before an install
    pub const DEFAULT: ImageSize = ImageSize(3 * Self::GIB);

    /// Largest size in MiB that still fits in bytes
    pub const MAX_MIB: u64 = u64::MAX / Self::MIB;

    /// `None` for zero or for sizes that overflow
    pub const fn from_mib(mib: u64) -> Option<Self> {
        match mib.checked_mul(Self::MIB) {
            Some(bytes) if bytes > 0 => Some(Self(bytes)),
            _ => None,
        }
    }

    /// Size argument in the suffix notation make_ext4fs and resize2fs accept
    pub fn to_tool_arg(self) -> String {
        if self.0 % Self::GIB == 0 {
            format!("{}G", self.0 / Self::GIB)
        } else {
            format!("{}M", self.0 / Self::MIB)
        }
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_tool_arg())
    }
}

/// Filesystem locations the sandbox is built from and into
#[derive(Debug, Clone)]
pub struct Layout {
    /// Root of the isolated filesystem namespace
    pub sandbox_root: PathBuf,
    /// Host directory that extracted helper tools are staged in
    pub staging_dir: PathBuf,
    /// Host `sbin`, copied into the sandbox's private `sbin`
    pub host_sbin: PathBuf,
    /// Host input devices, needed by the graphical selector
    pub host_dev_input: PathBuf,
    /// Host framebuffer devices, needed by the graphical selector
    pub host_dev_graphics: PathBuf,
    /// Real storage areas that must be mounted before anything else
    pub host_storage: Vec<PathBuf>,
}

impl Layout {
    pub fn new(sandbox_root: impl Into<PathBuf>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            sandbox_root: sandbox_root.into(),
            staging_dir: staging_dir.into(),
            host_sbin: PathBuf::from("/sbin"),
            host_dev_input: PathBuf::from("/dev/input"),
            host_dev_graphics: PathBuf::from("/dev/graphics"),
            host_storage: vec![
                PathBuf::from("/system"),
                PathBuf::from("/cache"),
                PathBuf::from("/data"),
            ],
        }
    }

    /// Maps an absolute in-sandbox path onto the host filesystem
    pub fn in_sandbox(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        let relative = path.strip_prefix("/").unwrap_or(path);
        self.sandbox_root.join(relative)
    }

    /// Path of a staged helper on the host
    pub fn staged(&self, name: &str) -> PathBuf {
        self.staging_dir.join(name)
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::new(DEFAULT_SANDBOX_ROOT, DEFAULT_STAGING_DIR)
    }
}

/// Everything one installation run needs to know besides its collaborators
#[derive(Debug, Clone)]
pub struct Config {
    pub layout: Layout,
    /// Capacity a system image is grown to before installing
    pub image_size: ImageSize,
    /// Minimize passes run after installing
    pub shrink_passes: usize,
    /// Host tool that creates a fresh ext4 image
    pub make_ext4fs: String,
    /// Property files consulted when `getprop` is unavailable
    pub prop_files: Vec<PathBuf>,
}

impl Config {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            image_size: ImageSize::DEFAULT,
            shrink_passes: SHRINK_PASSES,
            make_ext4fs: "make_ext4fs".to_string(),
            prop_files: vec![
                PathBuf::from("/default.prop"),
                PathBuf::from("/system/build.prop"),
            ],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Layout::default())
    }
}
