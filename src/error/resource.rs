//! Constructors for resource-level errors

use std::fmt::Display;
use std::path::Path;

use super::InstallerError;

/// Creates a resource error for `operation` on `path`
pub fn failed(operation: &'static str, path: &Path, reason: impl Display) -> InstallerError {
    InstallerError::Resource {
        operation,
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Returns a closure suitable for `map_err` on io results
pub fn with(operation: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> InstallerError {
    move |err| failed(operation, path, err)
}

/// Creates a read error for a file the installer expected to find
pub fn read_failed(path: &Path, reason: impl Display) -> InstallerError {
    InstallerError::ReadFailed {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}
