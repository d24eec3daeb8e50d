//! User-visible progress reporting
//!
//! Recovery hands the installer a file descriptor and reads a line-oriented
//! protocol from it. Every message is two lines: `ui_print <text>` and a bare
//! `ui_print` sentinel that makes the recovery flush the text to the screen.
//!
//! All reporting goes through the [`ProgressReporter`] trait so the
//! orchestrator can be driven against an in-memory reporter in tests.

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{BorrowedFd, RawFd};

/// Prefix shown in front of every message
const PREFIX: &str = "[MultiBoot]";

/// Progress reporter for user-facing messages
pub trait ProgressReporter {
    /// Show one line of text to the user
    fn print(&self, message: &str);
}

/// Formats one message in the recovery protocol
pub fn format_message(message: &str) -> String {
    format!("ui_print {PREFIX} {message}\nui_print\n")
}

/// Reporter writing the recovery protocol to a file descriptor
pub struct RecoveryReporter<W: Write> {
    out: RefCell<W>,
}

impl RecoveryReporter<File> {
    /// Wraps a duplicate of `fd`; the original stays open and inheritable so
    /// child installers can keep writing to it
    pub fn from_fd(fd: RawFd) -> io::Result<Self> {
        if fd < 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        // SAFETY: the fd number came from our caller and is only borrowed
        // long enough to duplicate it.
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        let owned = borrowed.try_clone_to_owned()?;
        Ok(Self::new(File::from(owned)))
    }
}

impl<W: Write> RecoveryReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: RefCell::new(out),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write> ProgressReporter for RecoveryReporter<W> {
    fn print(&self, message: &str) {
        log::info!("{message}");
        let mut out = self.out.borrow_mut();
        let written = out
            .write_all(format_message(message).as_bytes())
            .and_then(|()| out.flush());
        if let Err(e) = written {
            log::warn!("Failed to write progress message: {e}");
        }
    }
}
