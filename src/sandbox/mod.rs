//! The chroot environment installers run in
//!
//! A sandbox is a directory tree with private virtual filesystems, a copy of
//! the host's `sbin`, a handful of device nodes and nothing else. It is either
//! fully built or fully absent from the mount table: building always starts by
//! unmounting and deleting whatever a previous run left behind, and a failed
//! build destroys what it created before reporting the error.

pub mod devices;
pub mod wrapper;

use std::path::{Path, PathBuf};

use crate::common::fs::{CopyOptions, copy_dir_contents, create_empty_file, ensure_dir, remove_tree};
use crate::config::Layout;
use crate::error::{InstallerError, Result, resource};
use crate::host::{self, Host};
use crate::paths::SANDBOX_MARKER;
use crate::process::{CommandRunner, Invocation};
use crate::transaction::TeardownReport;

/// Directories created directly under the sandbox root
const SKELETON: [&str; 9] = [
    "dev", "etc", "proc", "sbin", "sys", "tmp", "data", "cache", "system",
];

/// Private virtual filesystems, in mount order
const VIRTUAL_MOUNTS: [(&str, &str); 7] = [
    ("tmpfs", "dev"),
    ("devpts", "dev/pts"),
    ("proc", "proc"),
    ("sysfs", "sys"),
    ("selinuxfs", "sys/fs/selinux"),
    ("tmpfs", "tmp"),
    // Writable so the busybox shim and unzip helper can be dropped in
    ("tmpfs", "sbin"),
];

/// Every mount point a build or an install creates, in unmount order
const TEARDOWN_ORDER: [&str; 12] = [
    "tmp/install.zip",
    "tmp/system.img",
    "system",
    "cache",
    "data",
    "dev/pts",
    "dev",
    "sys/fs/selinux",
    "sys",
    "proc",
    "tmp",
    "sbin",
];

const DIR_MODE: u32 = 0o755;

/// Builds, populates and destroys the sandbox
pub struct Sandbox<'a> {
    host: &'a dyn Host,
    runner: &'a dyn CommandRunner,
    layout: &'a Layout,
}

impl<'a> Sandbox<'a> {
    pub fn new(host: &'a dyn Host, runner: &'a dyn CommandRunner, layout: &'a Layout) -> Self {
        Self {
            host,
            runner,
            layout,
        }
    }

    pub fn host(&self) -> &'a dyn Host {
        self.host
    }

    pub fn root(&self) -> &Path {
        &self.layout.sandbox_root
    }

    /// Host path of an absolute in-sandbox path
    pub fn path(&self, path: impl AsRef<Path>) -> PathBuf {
        self.layout.in_sandbox(path)
    }

    /// Build the sandbox from scratch.
    ///
    /// On failure everything built so far is destroyed before the error is
    /// returned, so there is nothing for the caller to tear down.
    pub fn build(&self) -> Result<()> {
        match self.build_steps() {
            Ok(()) => {
                log::debug!("Sandbox ready at {}", self.root().display());
                Ok(())
            }
            Err(e) => {
                log::error!("Sandbox build failed: {e}");
                self.destroy().log();
                Err(e)
            }
        }
    }

    fn build_steps(&self) -> Result<()> {
        self.mount_host_storage()?;
        self.clear()?;

        ensure_dir(self.root(), DIR_MODE).map_err(resource::with("mkdir", self.root()))?;
        for dir in SKELETON {
            let path = self.root().join(dir);
            ensure_dir(&path, DIR_MODE).map_err(resource::with("mkdir", &path))?;
        }

        for (fstype, dir) in VIRTUAL_MOUNTS {
            let path = self.root().join(dir);
            ensure_dir(&path, DIR_MODE).map_err(resource::with("mkdir", &path))?;
            self.host
                .mount_virtual(fstype, &path)
                .map_err(resource::with("mount", &path))?;
        }

        let sbin = self.root().join("sbin");
        copy_dir_contents(&self.layout.host_sbin, &sbin, CopyOptions::preserve_all())
            .map_err(resource::with("copy", &self.layout.host_sbin))?;

        devices::create_device_nodes(self.host, &self.root().join("dev"))?;

        for (source, dir) in [
            (&self.layout.host_dev_input, "dev/input"),
            (&self.layout.host_dev_graphics, "dev/graphics"),
        ] {
            copy_dir_contents(source, &self.root().join(dir), CopyOptions::preserve_all())
                .map_err(resource::with("copy", source))?;
        }

        let marker = self.path(SANDBOX_MARKER);
        create_empty_file(&marker).map_err(resource::with("create", &marker))
    }

    /// Ask the host to mount its storage areas, then check the mount table.
    ///
    /// Each mount is attempted regardless of the others; the helper's exit
    /// status is not trusted either way.
    fn mount_host_storage(&self) -> Result<()> {
        for area in &self.layout.host_storage {
            let invocation = Invocation::new("mount").arg_path(area);
            match self.runner.status(&invocation) {
                Ok(status) if status.success() => {}
                Ok(status) => log::debug!("{invocation}: {status}"),
                Err(e) => log::warn!("Failed to run {invocation}: {e}"),
            }
        }

        for area in &self.layout.host_storage {
            let mounted = self
                .host
                .is_mounted(area)
                .map_err(resource::with("read mount table for", area))?;
            if !mounted {
                return Err(InstallerError::NotMounted {
                    path: area.display().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Unmount everything under the root, then delete it
    fn clear(&self) -> Result<()> {
        host::unmount_all(self.host, self.root())?;
        remove_tree(self.root()).map_err(resource::with("delete", self.root()))
    }

    /// Bind a storage directory onto an in-sandbox directory.
    ///
    /// Both ends are created with `mode` when missing.
    pub fn bind_dir(&self, source: &Path, target: &str, mode: u32) -> Result<PathBuf> {
        let target = self.path(target);
        ensure_dir(source, mode).map_err(resource::with("mkdir", source))?;
        ensure_dir(&target, mode).map_err(resource::with("mkdir", &target))?;
        self.host
            .bind_mount(source, &target)
            .map_err(resource::with("bind mount", source))?;
        Ok(target)
    }

    /// Bind a single file onto an empty placeholder inside the sandbox
    pub fn bind_file(&self, source: &Path, target: &str) -> Result<PathBuf> {
        let target = self.path(target);
        create_empty_file(&target).map_err(resource::with("create", &target))?;
        self.host
            .bind_mount(source, &target)
            .map_err(resource::with("bind mount", source))?;
        Ok(target)
    }

    /// Unmount one in-sandbox mount point, tolerating "not mounted"
    pub fn unmount(&self, target: &str) -> Result<()> {
        host::unmount_quietly(self.host, &self.path(target)).map_or(Ok(()), Err)
    }

    /// Tear the sandbox down.
    ///
    /// Safe on a partially built or absent sandbox. Individual unmount
    /// failures are warnings; the final sweep and delete decide success.
    pub fn destroy(&self) -> TeardownReport {
        let mut report = TeardownReport::new();
        for target in TEARDOWN_ORDER {
            if let Some(e) = host::unmount_quietly(self.host, &self.path(target)) {
                report.warn(e);
            }
        }
        if let Err(e) = self.clear() {
            report.fail(e);
        }
        report
    }
}
