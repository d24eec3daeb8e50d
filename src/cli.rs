//! CLI definitions using clap derive API

use clap::Parser;
use clap::builder::{Styles, styling::AnsiColor};
use std::path::PathBuf;

use crate::common::fs::resolve;
use crate::config::{Config, DEFAULT_SANDBOX_ROOT, DEFAULT_STAGING_DIR, ImageSize, Layout};

/// Multi-ROM update-binary wrapper
///
/// Installs a flashable zip into the selected ROM slot from inside a sandbox.
#[derive(Parser, Debug)]
#[command(
    name = "update-binary",
    author,
    version,
    styles = Styles::styled()
        .header(AnsiColor::Green.on_default().bold())
        .usage(AnsiColor::Green.on_default().bold())
        .literal(AnsiColor::Cyan.on_default().bold())
        .placeholder(AnsiColor::Cyan.on_default()),
    about = "Multi-ROM update-binary wrapper for Android recoveries",
    long_about = "Runs the real installer of a flashable zip inside a chroot whose /system, \
                  /cache and /data point at the ROM slot picked in the bundled AROMA selector.\n\n\
                  The real installer must be META-INF/com/google/android/update-binary.orig \
                  in the zip. The interface version is ignored and passed through as is.",
    after_help = "\x1b[1m\x1b[32mExamples:\x1b[0m\n   \
                  update-binary 3 5 /sdcard/rom.zip      \x1b[90m# As invoked by the recovery\x1b[0m\n   \
                  update-binary -v 3 5 /sdcard/rom.zip   \x1b[90m# With debug logging on stderr\x1b[0m\n"
)]
pub struct Cli {
    /// Recovery interface version (ignored)
    #[arg(value_name = "INTERFACE")]
    pub interface: String,

    /// File descriptor the recovery reads progress messages from
    #[arg(value_name = "OUTPUT_FD")]
    pub output_fd: u32,

    /// The flashable zip
    #[arg(value_name = "ZIP")]
    pub zip: PathBuf,

    /// Enable verbose output
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Directory the sandbox is built in
    #[arg(
        long,
        value_name = "DIR",
        env = "MBINSTALL_SANDBOX_ROOT",
        default_value = DEFAULT_SANDBOX_ROOT,
        value_parser = absolute_path
    )]
    pub sandbox_root: PathBuf,

    /// Capacity system images are grown to before installing, in MiB
    #[arg(
        long,
        value_name = "MIB",
        env = "MBINSTALL_IMAGE_SIZE_MIB",
        default_value_t = 3072,
        value_parser = clap::value_parser!(u64).range(1..=ImageSize::MAX_MIB)
    )]
    pub image_size_mib: u64,

    /// Host directory helper tools are staged in
    #[arg(
        long,
        value_name = "DIR",
        env = "MBINSTALL_STAGING_DIR",
        default_value = DEFAULT_STAGING_DIR,
        value_parser = absolute_path
    )]
    pub staging_dir: PathBuf,
}

fn absolute_path(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        Ok(path)
    } else {
        Err(format!("'{value}' is not an absolute path"))
    }
}

impl Cli {
    /// The sandbox root is resolved so it matches the kernel's mount table
    pub fn config(&self) -> Config {
        let mut config = Config::new(Layout::new(resolve(&self.sandbox_root), &self.staging_dir));
        config.image_size = ImageSize::from_mib(self.image_size_mib).unwrap_or_else(|| {
            log::warn!("Invalid image size {} MiB, using default", self.image_size_mib);
            ImageSize::DEFAULT
        });
        config
    }

    /// Default log filter; `RUST_LOG` takes precedence
    pub fn log_filter(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }
}
