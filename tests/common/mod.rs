//! Common test utilities for update-binary integration tests

use assert_cmd::Command;
use std::path::PathBuf;
use tempfile::TempDir;

/// Scratch directories the binary is pointed at instead of `/chroot` and `/tmp`
pub struct TestWorkspace {
    #[allow(dead_code)]
    pub temp: TempDir,
    pub path: PathBuf,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp directory");
        let path = temp.path().to_path_buf();
        Self { temp, path }
    }

    /// Write a file in the workspace and return its path
    #[allow(dead_code)]
    pub fn write_file(&self, path: &str, content: &str) -> PathBuf {
        let file_path = self.path.join(path);
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(&file_path, content).expect("Failed to write file");
        file_path
    }

    /// The binary with its sandbox and staging dirs inside this workspace
    pub fn command(&self) -> Command {
        let mut cmd = update_binary();
        cmd.env("MBINSTALL_SANDBOX_ROOT", self.path.join("chroot"))
            .env("MBINSTALL_STAGING_DIR", self.path.join("staging"))
            .env_remove("RUST_LOG");
        cmd
    }
}

// Temporary fix for deprecated cargo_bin - will be updated when build-dir issues are resolved
#[allow(deprecated)]
pub fn update_binary() -> Command {
    Command::cargo_bin("update-binary").expect("update-binary binary not built")
}
