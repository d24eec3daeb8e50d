//! ext4 image capacity management
//!
//! Image-backed ROM slots keep their system partition in a single ext4 image.
//! Before an install the image is grown to a fixed capacity; afterwards it is
//! shrunk back to (close to) its minimum size. Every resize is preceded by a
//! forced check-and-repair because resize2fs refuses to touch an unchecked
//! filesystem.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::common::fs::ensure_parent;
use crate::config::ImageSize;
use crate::error::{InstallerError, Result, resource};
use crate::process::{CommandRunner, Invocation, run_checked};

/// Mode of directories created to hold a new image
const IMAGE_DIR_MODE: u32 = 0o700;

/// Grows and shrinks ext4 images with e2fsprogs
pub struct ImageManager<'a> {
    runner: &'a dyn CommandRunner,
    e2fsck: PathBuf,
    resize2fs: PathBuf,
    make_ext4fs: String,
}

impl<'a> ImageManager<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        e2fsck: impl Into<PathBuf>,
        resize2fs: impl Into<PathBuf>,
        make_ext4fs: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            e2fsck: e2fsck.into(),
            resize2fs: resize2fs.into(),
            make_ext4fs: make_ext4fs.into(),
        }
    }

    /// Create a new image of `size`, or grow an existing one to `size`
    pub fn create_or_enlarge(&self, path: &Path, size: ImageSize) -> Result<()> {
        ensure_parent(path, IMAGE_DIR_MODE).map_err(resource::with("create parent of", path))?;

        match fs::metadata(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("{}: Creating new {size} ext4 image", path.display());
                return run_checked(
                    self.runner,
                    &Invocation::new(&self.make_ext4fs)
                        .arg("-l")
                        .arg(size.to_tool_arg())
                        .arg_path(path),
                );
            }
            Err(e) => return Err(resource::failed("stat", path, e)),
            Ok(_) => {}
        }

        self.check(path)?;

        log::debug!("{}: Enlarging to {size}", path.display());
        run_checked(
            self.runner,
            &Invocation::from_path(&self.resize2fs)
                .arg_path(path)
                .arg(size.to_tool_arg()),
        )
    }

    /// Check the image, then minimize it `passes` times.
    ///
    /// resize2fs never goes below its worst-case estimate in one pass, so
    /// repeated passes converge on the real minimum.
    pub fn shrink(&self, path: &Path, passes: usize) -> Result<()> {
        self.check(path)?;

        let minimize = Invocation::from_path(&self.resize2fs).arg("-M").arg_path(path);
        for pass in 1..=passes {
            log::debug!("{}: Shrink pass {pass}/{passes}", path.display());
            run_checked(self.runner, &minimize)?;
        }
        Ok(())
    }

    /// Forced, non-interactive check-and-repair.
    ///
    /// Exit status 1 means errors were found and corrected.
    fn check(&self, path: &Path) -> Result<()> {
        let invocation = Invocation::from_path(&self.e2fsck)
            .args(["-f", "-y"])
            .arg_path(path);
        let status = self
            .runner
            .status(&invocation)
            .map_err(|e| InstallerError::SpawnFailed {
                program: invocation.program().to_string(),
                reason: e.to_string(),
            })?;

        match status.code() {
            Some(0) => Ok(()),
            Some(1) => {
                log::info!("{}: Filesystem errors were corrected", path.display());
                Ok(())
            }
            _ => Err(InstallerError::NonZeroExit {
                program: invocation.program().to_string(),
                status: status.to_string(),
            }),
        }
    }
}
