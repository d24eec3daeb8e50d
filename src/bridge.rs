//! Running programs inside the sandbox
//!
//! The bridge decides whether a child needs suspend/resume coordination with
//! the supervisor. When it does, the supervisor is resumed exactly once after
//! the child reaches a terminal state, whatever that state is.

use crate::error::{InstallerError, Result};
use crate::process::{CommandRunner, Invocation, run_checked};
use crate::supervisor::{CoordinationToken, Supervisor};

/// Whether a child run freezes the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coordination {
    /// Suspend the supervisor for the duration of the child
    Suspend,
    /// Leave the supervisor running
    None,
}

/// A suspended supervisor that is resumed on `finish` or on drop
struct Suspension<'a> {
    supervisor: &'a dyn Supervisor,
    token: CoordinationToken,
    resumed: bool,
}

impl<'a> Suspension<'a> {
    fn begin(supervisor: &'a dyn Supervisor) -> (Self, Option<InstallerError>) {
        let token = supervisor.token();
        let suspend_error = supervisor.suspend(token).err();
        (
            Self {
                supervisor,
                token,
                resumed: false,
            },
            suspend_error,
        )
    }

    fn finish(mut self) -> Result<()> {
        self.resumed = true;
        self.supervisor.resume(self.token)
    }
}

impl Drop for Suspension<'_> {
    fn drop(&mut self) {
        if !self.resumed {
            self.resumed = true;
            if let Err(e) = self.supervisor.resume(self.token) {
                log::error!("{e}");
            }
        }
    }
}

/// Runs programs confined to the sandbox root
pub struct Bridge<'a> {
    runner: &'a dyn CommandRunner,
    supervisor: &'a dyn Supervisor,
}

impl<'a> Bridge<'a> {
    pub fn new(runner: &'a dyn CommandRunner, supervisor: &'a dyn Supervisor) -> Self {
        Self { runner, supervisor }
    }

    /// Run `invocation` to completion.
    ///
    /// A spawn failure or non-zero exit is the primary error. A failed
    /// suspend or resume is only returned when the child itself succeeded;
    /// otherwise it is logged next to the primary error.
    pub fn run(&self, invocation: &Invocation, coordination: Coordination) -> Result<()> {
        match coordination {
            Coordination::None => run_checked(self.runner, invocation),
            Coordination::Suspend => self.run_suspended(invocation),
        }
    }

    fn run_suspended(&self, invocation: &Invocation) -> Result<()> {
        let (suspension, suspend_error) = Suspension::begin(self.supervisor);
        if let Some(e) = &suspend_error {
            log::warn!("{e}");
        }

        let child = run_checked(self.runner, invocation);
        let resumed = suspension.finish();

        match (child, resumed) {
            (Err(primary), Err(signal)) => {
                log::error!("{signal}");
                Err(primary)
            }
            (Err(primary), Ok(())) => Err(primary),
            (Ok(()), Err(signal)) => Err(signal),
            (Ok(()), Ok(())) => suspend_error.map_or(Ok(()), Err),
        }
    }
}
