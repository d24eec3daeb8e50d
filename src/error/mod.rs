//! Error types and handling for the installer
//!
//! Uses `thiserror` for error definitions and `miette` for diagnostics.
//!
//! Variants are grouped by the taxonomy the orchestrator reports on:
//! - resource: mount, unmount, mknod, mkdir, chmod, copy and delete failures
//! - extraction: archive entries that are missing or unreadable
//! - verification: the archive targets another device
//! - selection: the chosen ROM slot cannot be installed to
//! - subprocess: a child failed to start or exited non-zero
//! - signal: suspend/resume delivery to the supervising process failed
//!
//! [`resource`] holds the constructors used across the host-facing modules.

pub mod resource;

use miette::Diagnostic;
use thiserror::Error;

/// Main error type for installer operations
#[derive(Error, Diagnostic, Debug)]
pub enum InstallerError {
    // Resource errors
    #[error("Failed to {operation} {path}: {reason}")]
    #[diagnostic(code(mbinstall::resource::failed))]
    Resource {
        operation: &'static str,
        path: String,
        reason: String,
    },

    #[error("{path} is not mounted")]
    #[diagnostic(
        code(mbinstall::resource::not_mounted),
        help("The recovery's mount helper reported success without mounting the partition")
    )]
    NotMounted { path: String },

    #[error("Mount points remain under {root} after unmounting: {remaining}")]
    #[diagnostic(code(mbinstall::resource::busy))]
    MountsRemain { root: String, remaining: String },

    // Extraction errors
    #[error("Failed to extract {entry} from {archive}: {reason}")]
    #[diagnostic(code(mbinstall::extraction::failed))]
    ExtractionFailed {
        entry: String,
        archive: String,
        reason: String,
    },

    #[error("Failed to read {path}: {reason}")]
    #[diagnostic(code(mbinstall::extraction::read_failed))]
    ReadFailed { path: String, reason: String },

    // Verification errors
    #[error("The patched zip is for '{declared}'. This device is '{device}'.")]
    #[diagnostic(
        code(mbinstall::verification::device_mismatch),
        help("Patch the zip for this device before flashing it")
    )]
    DeviceMismatch { declared: String, device: String },

    // Selection errors
    #[error("Unknown ROM ID: {id}")]
    #[diagnostic(code(mbinstall::selection::unknown_rom))]
    UnknownRom { id: String },

    #[error("Installing ROMs to a directory is no longer supported ({id}: {path})")]
    #[diagnostic(
        code(mbinstall::selection::unsupported_storage),
        help("Only image-backed system storage can be installed to")
    )]
    UnsupportedSystemStorage { id: String, path: String },

    #[error("Failed to parse ROM registry {path}: {reason}")]
    #[diagnostic(code(mbinstall::selection::registry_parse))]
    RegistryParse { path: String, reason: String },

    // Subprocess errors
    #[error("Failed to execute {program}: {reason}")]
    #[diagnostic(code(mbinstall::subprocess::spawn_failed))]
    SpawnFailed { program: String, reason: String },

    #[error("{program} returned non-zero exit status ({status})")]
    #[diagnostic(code(mbinstall::subprocess::exit_status))]
    NonZeroExit { program: String, status: String },

    // Signal errors
    #[error("Failed to {action} supervising process {pid}: {reason}")]
    #[diagnostic(
        code(mbinstall::signal::failed),
        help("The recovery may be left frozen; send it SIGCONT manually")
    )]
    SignalFailed {
        action: &'static str,
        pid: i32,
        reason: String,
    },

    // Teardown errors
    #[error("Failed to destroy sandbox: {details}")]
    #[diagnostic(
        code(mbinstall::teardown::failed),
        help("Reboot into recovery again to avoid flashing issues")
    )]
    TeardownFailed { details: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(mbinstall::io))]
    Io { message: String },
}

impl InstallerError {
    /// Short taxonomy label used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Resource { .. } | Self::NotMounted { .. } | Self::MountsRemain { .. } => {
                "resource"
            }
            Self::ExtractionFailed { .. } | Self::ReadFailed { .. } => "extraction",
            Self::DeviceMismatch { .. } => "verification",
            Self::UnknownRom { .. }
            | Self::UnsupportedSystemStorage { .. }
            | Self::RegistryParse { .. } => "selection",
            Self::SpawnFailed { .. } | Self::NonZeroExit { .. } => "subprocess",
            Self::SignalFailed { .. } => "signal",
            Self::TeardownFailed { .. } => "teardown",
            Self::Io { .. } => "io",
        }
    }
}

impl From<std::io::Error> for InstallerError {
    fn from(err: std::io::Error) -> Self {
        InstallerError::Io {
            message: err.to_string(),
        }
    }
}

/// Result type alias using miette for error handling
pub type Result<T> = miette::Result<T, InstallerError>;
