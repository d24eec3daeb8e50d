//! External command execution
//!
//! Commands are described by an [`Invocation`] and executed through the
//! [`CommandRunner`] trait. [`HostRunner`] spawns real processes with
//! inherited stdio, optionally confined to a chroot.

use std::fmt;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use crate::error::{InstallerError, Result};

/// A program plus its arguments, optionally run inside a new root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    root: Option<PathBuf>,
}

impl Invocation {
    /// Create a new invocation of `program`
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            root: None,
        }
    }

    /// Invocation of a program addressed by path
    pub fn from_path(program: &Path) -> Self {
        Self::new(program.to_string_lossy())
    }

    /// Add a single argument
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Add a path as an argument
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Run the program with `root` as its filesystem root
    pub fn chroot(mut self, root: &Path) -> Self {
        self.root = Some(root.to_path_buf());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(root) = &self.root {
            write!(f, "[{}] ", root.display())?;
        }
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Spawns programs and waits for them
pub trait CommandRunner {
    /// Run to completion. `Err` means the program could not be started.
    fn status(&self, invocation: &Invocation) -> io::Result<ExitStatus>;
}

/// Runs commands on the real system
#[derive(Debug, Default, Clone, Copy)]
pub struct HostRunner;

impl CommandRunner for HostRunner {
    fn status(&self, invocation: &Invocation) -> io::Result<ExitStatus> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        cmd.stdin(Stdio::inherit());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());

        if let Some(root) = invocation.root().map(Path::to_path_buf) {
            // SAFETY: chroot and chdir are async-signal-safe and the closure
            // touches no state shared with the parent.
            unsafe {
                cmd.pre_exec(move || {
                    nix::unistd::chroot(root.as_path())?;
                    nix::unistd::chdir("/")?;
                    Ok(())
                });
            }
        }

        log::debug!("Running {invocation}");
        cmd.status()
    }
}

/// Run and map both spawn failures and non-zero exits to errors
pub fn run_checked(runner: &dyn CommandRunner, invocation: &Invocation) -> Result<()> {
    let status = runner
        .status(invocation)
        .map_err(|e| InstallerError::SpawnFailed {
            program: invocation.program.clone(),
            reason: e.to_string(),
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(InstallerError::NonZeroExit {
            program: invocation.program.clone(),
            status: status.to_string(),
        })
    }
}
