//! Test fixtures: in-memory collaborators and temp directory helpers.
//!
//! Every privileged or external collaborator of the installer has a fake here
//! so the sandbox and the orchestrator can be driven end to end without root.
//!
//! # Usage
//!
//! ```ignore
//! use crate::test_fixtures::{FakeHost, FakeRunner, create_temp_dir};
//!
//! #[test]
//! fn my_test() {
//!     let temp = create_temp_dir();
//!     let host = FakeHost::new();
//!     host.add_mount("/system");
//!     let runner = FakeRunner::new();
//!     runner.exit_with("/tmp/updater", 1);
//! }
//! ```

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::env;
use std::fs;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use tempfile::TempDir;

use crate::config::Layout;
use crate::error::{InstallerError, Result};
use crate::extract::{ExtractionRequest, Extractor};
use crate::host::{DeviceNode, Host};
use crate::process::{CommandRunner, Invocation};
use crate::supervisor::{CoordinationToken, Supervisor};
use crate::ui::ProgressReporter;

/// Base directory for test temp dirs; never relative to the working directory
fn temp_dir_base() -> PathBuf {
    let t = env::temp_dir();
    if t.is_absolute() {
        t
    } else {
        PathBuf::from("/tmp")
    }
}

/// Create a temp directory in the system temp location.
///
/// # Panics
///
/// Panics if the temp directory cannot be created.
#[must_use]
pub fn create_temp_dir() -> TempDir {
    TempDir::new_in(temp_dir_base()).expect("Failed to create temp directory")
}

/// Create test files in a directory.
///
/// Takes a list of (path, content) tuples relative to `base`.
///
/// # Panics
///
/// Panics if any file cannot be created.
pub fn create_test_files(base: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let full_path = base.join(path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        fs::write(&full_path, content).expect("Failed to write test file");
    }
}

/// Layout rooted in `base` with a populated fake host `sbin` and `/dev`.
///
/// Host storage keeps its real paths; pair with [`mounted_host`].
pub fn sandbox_layout(base: &Path) -> Layout {
    create_test_files(
        base,
        &[
            ("host/sbin/busybox", "#!busybox"),
            ("host/sbin/recovery", "#!recovery"),
            ("host/dev/input/event0", ""),
            ("host/dev/graphics/fb0", ""),
        ],
    );
    let mut layout = Layout::new(base.join("chroot"), base.join("staging"));
    layout.host_sbin = base.join("host/sbin");
    layout.host_dev_input = base.join("host/dev/input");
    layout.host_dev_graphics = base.join("host/dev/graphics");
    fs::create_dir_all(&layout.staging_dir).expect("Failed to create staging directory");
    layout
}

/// Fake host whose storage areas are already mounted
pub fn mounted_host(layout: &Layout) -> FakeHost {
    let host = FakeHost::new();
    for area in &layout.host_storage {
        host.add_mount(area);
    }
    host
}

type RunHook = Box<dyn Fn(&Invocation) -> i32>;

/// Command runner that records invocations instead of spawning processes.
///
/// Programs exit 0 unless told otherwise.
#[derive(Default)]
pub struct FakeRunner {
    invocations: RefCell<Vec<Invocation>>,
    hooks: RefCell<HashMap<String, RunHook>>,
    unspawnable: RefCell<HashSet<String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `program` exit with `code`
    pub fn exit_with(&self, program: &str, code: i32) {
        self.on_run(program, move |_| code);
    }

    /// Make `program` fail to start
    pub fn fail_spawn(&self, program: &str) {
        self.unspawnable.borrow_mut().insert(program.to_string());
    }

    /// Run `hook` whenever `program` runs; its return value is the exit code
    pub fn on_run(&self, program: &str, hook: impl Fn(&Invocation) -> i32 + 'static) {
        self.hooks
            .borrow_mut()
            .insert(program.to_string(), Box::new(hook));
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.borrow().clone()
    }

    /// Invocations rendered as `program arg...` for compact assertions
    pub fn command_lines(&self) -> Vec<String> {
        self.invocations
            .borrow()
            .iter()
            .map(|i| {
                std::iter::once(i.program().to_string())
                    .chain(i.arguments().iter().cloned())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect()
    }
}

impl CommandRunner for FakeRunner {
    fn status(&self, invocation: &Invocation) -> io::Result<ExitStatus> {
        self.invocations.borrow_mut().push(invocation.clone());
        if self.unspawnable.borrow().contains(invocation.program()) {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        let code = self
            .hooks
            .borrow()
            .get(invocation.program())
            .map_or(0, |hook| hook(invocation));
        Ok(ExitStatus::from_raw(code << 8))
    }
}

/// What a [`FakeSupervisor`] was asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEvent {
    Suspend(i32),
    Resume(i32),
}

/// Supervisor that records signals instead of sending them
pub struct FakeSupervisor {
    pid: i32,
    events: RefCell<Vec<SupervisorEvent>>,
    suspend_fails: Cell<bool>,
    resume_fails: Cell<bool>,
}

impl FakeSupervisor {
    pub fn new(pid: i32) -> Self {
        Self {
            pid,
            events: RefCell::new(Vec::new()),
            suspend_fails: Cell::new(false),
            resume_fails: Cell::new(false),
        }
    }

    pub fn fail_suspend(&self) {
        self.suspend_fails.set(true);
    }

    pub fn fail_resume(&self) {
        self.resume_fails.set(true);
    }

    pub fn events(&self) -> Vec<SupervisorEvent> {
        self.events.borrow().clone()
    }

    pub fn resume_count(&self) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|e| matches!(e, SupervisorEvent::Resume(_)))
            .count()
    }

    fn deliver(&self, event: SupervisorEvent, fails: bool, action: &'static str) -> Result<()> {
        self.events.borrow_mut().push(event);
        if fails {
            Err(InstallerError::SignalFailed {
                action,
                pid: self.pid,
                reason: "Operation not permitted".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

impl Supervisor for FakeSupervisor {
    fn token(&self) -> CoordinationToken {
        CoordinationToken::from_raw(self.pid)
    }

    fn suspend(&self, token: CoordinationToken) -> Result<()> {
        self.deliver(
            SupervisorEvent::Suspend(token.pid()),
            self.suspend_fails.get(),
            "suspend",
        )
    }

    fn resume(&self, token: CoordinationToken) -> Result<()> {
        self.deliver(
            SupervisorEvent::Resume(token.pid()),
            self.resume_fails.get(),
            "resume",
        )
    }
}

/// Host with an in-memory mount table.
///
/// Directories and files are still created on the real filesystem; only
/// mounting and device node creation are simulated. Device nodes become empty
/// regular files.
#[derive(Default)]
pub struct FakeHost {
    mounts: RefCell<Vec<PathBuf>>,
    pinned: RefCell<HashSet<PathBuf>>,
    refused: RefCell<HashSet<PathBuf>>,
    binds: RefCell<Vec<(PathBuf, PathBuf)>>,
    nodes: RefCell<Vec<(PathBuf, DeviceNode)>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mount point; the same path may be stacked several times
    pub fn add_mount(&self, path: impl AsRef<Path>) {
        self.mounts.borrow_mut().push(path.as_ref().to_path_buf());
    }

    /// Make unmounting `path` fail with EBUSY
    pub fn pin_mount(&self, path: impl AsRef<Path>) {
        self.pinned.borrow_mut().insert(path.as_ref().to_path_buf());
    }

    /// Make mounting onto `path` fail with EPERM
    pub fn refuse_mount(&self, path: impl AsRef<Path>) {
        self.refused.borrow_mut().insert(path.as_ref().to_path_buf());
    }

    pub fn binds(&self) -> Vec<(PathBuf, PathBuf)> {
        self.binds.borrow().clone()
    }

    pub fn nodes(&self) -> Vec<(PathBuf, DeviceNode)> {
        self.nodes.borrow().clone()
    }

    fn mount(&self, target: &Path) -> io::Result<()> {
        if self.refused.borrow().contains(target) {
            return Err(io::Error::from_raw_os_error(libc::EPERM));
        }
        self.add_mount(target);
        Ok(())
    }
}

impl Host for FakeHost {
    fn mount_virtual(&self, _fstype: &str, target: &Path) -> io::Result<()> {
        self.mount(target)
    }

    fn bind_mount(&self, source: &Path, target: &Path) -> io::Result<()> {
        self.mount(target)?;
        self.binds
            .borrow_mut()
            .push((source.to_path_buf(), target.to_path_buf()));
        Ok(())
    }

    fn unmount(&self, target: &Path) -> io::Result<()> {
        let mut mounts = self.mounts.borrow_mut();
        let Some(index) = mounts.iter().rposition(|p| p == target) else {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        };
        if self.pinned.borrow().contains(target) {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        mounts.remove(index);
        Ok(())
    }

    fn mount_points(&self) -> io::Result<Vec<PathBuf>> {
        Ok(self.mounts.borrow().clone())
    }

    fn make_node(&self, path: &Path, node: &DeviceNode) -> io::Result<()> {
        fs::File::create(path)?;
        self.nodes.borrow_mut().push((path.to_path_buf(), *node));
        Ok(())
    }
}

/// Extractor serving entries from memory, regardless of the archive path
#[derive(Default)]
pub struct FakeExtractor {
    entries: RefCell<HashMap<String, Vec<u8>>>,
    extracted: RefCell<Vec<(PathBuf, String, PathBuf)>>,
}

impl FakeExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, entry: &str, content: impl AsRef<[u8]>) {
        self.entries
            .borrow_mut()
            .insert(entry.to_string(), content.as_ref().to_vec());
    }

    /// Every (archive, entry, destination) extracted so far
    pub fn extracted(&self) -> Vec<(PathBuf, String, PathBuf)> {
        self.extracted.borrow().clone()
    }
}

impl Extractor for FakeExtractor {
    fn contains(&self, _archive: &Path, entry: &str) -> Result<bool> {
        Ok(self.entries.borrow().contains_key(entry))
    }

    fn extract(&self, archive: &Path, request: &ExtractionRequest) -> Result<()> {
        for (entry, destination) in request.pairs() {
            let entries = self.entries.borrow();
            let content = entries
                .get(entry)
                .ok_or_else(|| InstallerError::ExtractionFailed {
                    entry: entry.clone(),
                    archive: archive.display().to_string(),
                    reason: "entry not found".to_string(),
                })?;
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(destination, content)?;
            self.extracted.borrow_mut().push((
                archive.to_path_buf(),
                entry.clone(),
                destination.clone(),
            ));
        }
        Ok(())
    }
}

/// Reporter that keeps messages in memory
#[derive(Default)]
pub struct MemoryReporter {
    messages: RefCell<Vec<String>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.borrow().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages.borrow().iter().any(|m| m.contains(needle))
    }
}

impl ProgressReporter for MemoryReporter {
    fn print(&self, message: &str) {
        self.messages.borrow_mut().push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_temp_dir() {
        let temp = create_temp_dir();
        assert!(temp.path().exists());
        assert!(temp.path().is_absolute());
    }

    #[test]
    fn test_create_test_files() {
        let temp = create_temp_dir();
        create_test_files(temp.path(), &[("sbin/busybox", "bb"), ("dev/input/event0", "")]);
        assert!(temp.path().join("sbin/busybox").is_file());
        assert!(temp.path().join("dev/input/event0").is_file());
    }

    #[test]
    fn test_fake_runner_exit_codes() {
        let runner = FakeRunner::new();
        runner.exit_with("e2fsck", 4);
        let ok = runner.status(&Invocation::new("mount")).unwrap();
        let failed = runner.status(&Invocation::new("e2fsck")).unwrap();
        assert!(ok.success());
        assert_eq!(failed.code(), Some(4));
        assert_eq!(runner.command_lines(), vec!["mount", "e2fsck"]);
    }

    #[test]
    fn test_fake_host_unmount_pops_topmost() {
        let host = FakeHost::new();
        host.add_mount("/chroot/tmp");
        host.add_mount("/chroot/tmp");
        host.unmount(Path::new("/chroot/tmp")).unwrap();
        assert_eq!(host.mount_points().unwrap().len(), 1);
        host.unmount(Path::new("/chroot/tmp")).unwrap();
        let err = host.unmount(Path::new("/chroot/tmp")).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
    }
}
