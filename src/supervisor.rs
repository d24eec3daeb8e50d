//! Cooperating supervisor process
//!
//! Recovery runs the installer and watches it with its own timeout. While an
//! interactive child owns the screen the supervisor is frozen with SIGSTOP and
//! thawed again with SIGCONT.

use nix::sys::signal::{Signal, kill};
use nix::unistd::{Pid, getppid};

use crate::error::{InstallerError, Result};

/// Identity of the supervising process, captured per child invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinationToken(i32);

impl CoordinationToken {
    pub fn from_raw(pid: i32) -> Self {
        Self(pid)
    }

    pub fn pid(self) -> i32 {
        self.0
    }
}

/// A process that can be suspended while a long interactive step runs
pub trait Supervisor {
    /// Identify the supervisor for one invocation
    fn token(&self) -> CoordinationToken;

    fn suspend(&self, token: CoordinationToken) -> Result<()>;

    fn resume(&self, token: CoordinationToken) -> Result<()>;
}

/// The real supervisor: our parent process
#[derive(Debug, Default, Clone, Copy)]
pub struct ParentProcess;

impl ParentProcess {
    fn signal(token: CoordinationToken, signal: Signal, action: &'static str) -> Result<()> {
        log::debug!("Sending {signal} to supervisor {}", token.pid());
        kill(Pid::from_raw(token.pid()), signal).map_err(|e| InstallerError::SignalFailed {
            action,
            pid: token.pid(),
            reason: e.to_string(),
        })
    }
}

impl Supervisor for ParentProcess {
    fn token(&self) -> CoordinationToken {
        CoordinationToken(getppid().as_raw())
    }

    fn suspend(&self, token: CoordinationToken) -> Result<()> {
        Self::signal(token, Signal::SIGSTOP, "suspend")
    }

    fn resume(&self, token: CoordinationToken) -> Result<()> {
        Self::signal(token, Signal::SIGCONT, "resume")
    }
}
