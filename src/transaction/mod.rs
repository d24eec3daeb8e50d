//! Guaranteed sandbox teardown
//!
//! A [`Transaction`] is opened once the sandbox is built and tracks every bind
//! mount made into it afterwards. Closing it unwinds those mounts in reverse
//! and destroys the sandbox; dropping it without closing does the same, so
//! every exit path tears down exactly once.
//!
//! ## Usage
//!
//! ```ignore
//! sandbox.build()?;
//! let mut transaction = Transaction::begin(&sandbox);
//!
//! transaction.bind_dir(&rom.cache_path, "/cache", 0o771)?;
//! transaction.bind_file(&archive, "/tmp/install.zip")?;
//!
//! // Any early return from here on still tears down via Drop
//! let report = transaction.close();
//! ```

use std::path::{Path, PathBuf};

use crate::error::{InstallerError, Result};
use crate::host;
use crate::sandbox::Sandbox;

/// Everything that went wrong while tearing down
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Problems that left mounts or the sandbox tree behind
    failures: Vec<InstallerError>,
    /// Individual unmounts that failed but were cleaned up later
    warnings: Vec<InstallerError>,
}

impl TeardownReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&mut self, error: InstallerError) {
        self.failures.push(error);
    }

    pub fn warn(&mut self, error: InstallerError) {
        self.warnings.push(error);
    }

    /// Fold `other` into this report
    pub fn merge(&mut self, other: TeardownReport) {
        self.failures.extend(other.failures);
        self.warnings.extend(other.warnings);
    }

    /// No mounts or files were left behind
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[InstallerError] {
        &self.failures
    }

    pub fn warnings(&self) -> &[InstallerError] {
        &self.warnings
    }

    pub fn log(&self) {
        for warning in self.warnings() {
            log::warn!("{warning}");
        }
        for failure in self.failures() {
            log::error!("{failure}");
        }
    }

    /// Collapse into a single aggregate error
    pub fn into_result(self) -> Result<()> {
        if self.is_clean() {
            return Ok(());
        }
        Err(InstallerError::TeardownFailed {
            details: self
                .failures()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        })
    }
}

/// Rollback stack over a built sandbox
pub struct Transaction<'a> {
    sandbox: &'a Sandbox<'a>,
    /// Bind mounts made since `begin`, oldest first
    mounts: Vec<PathBuf>,
    closed: bool,
}

impl<'a> Transaction<'a> {
    /// Start tracking a sandbox that was just built
    pub fn begin(sandbox: &'a Sandbox<'a>) -> Self {
        Self {
            sandbox,
            mounts: Vec::new(),
            closed: false,
        }
    }

    pub fn sandbox(&self) -> &'a Sandbox<'a> {
        self.sandbox
    }

    /// Bind a directory into the sandbox and track it
    pub fn bind_dir(&mut self, source: &Path, target: &str, mode: u32) -> Result<()> {
        let target = self.sandbox.bind_dir(source, target, mode)?;
        self.mounts.push(target);
        Ok(())
    }

    /// Bind a file into the sandbox and track it
    pub fn bind_file(&mut self, source: &Path, target: &str) -> Result<()> {
        let target = self.sandbox.bind_file(source, target)?;
        self.mounts.push(target);
        Ok(())
    }

    /// Number of tracked mounts still in place
    pub fn tracked(&self) -> usize {
        self.mounts.len()
    }

    /// Unwind and destroy the sandbox
    pub fn close(mut self) -> TeardownReport {
        self.unwind()
    }

    fn unwind(&mut self) -> TeardownReport {
        self.closed = true;
        log::debug!("Unwinding {} tracked mounts", self.tracked());
        let mut report = TeardownReport::new();
        while let Some(target) = self.mounts.pop() {
            if let Some(e) = host::unmount_quietly(self.sandbox.host(), &target) {
                report.warn(e);
            }
        }
        report.merge(self.sandbox.destroy());
        report
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.closed {
            log::debug!("Transaction dropped without close; tearing down");
            self.unwind().log();
        }
    }
}
