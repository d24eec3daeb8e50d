//! Archive extraction
//!
//! Everything the installer needs from a flashable zip goes through the
//! [`Extractor`] trait. Each destination must end up as a readable regular
//! file or the whole request fails.

use std::fs::{self, File};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::{InstallerError, Result};

/// Archive entries paired with the paths they are written to
#[derive(Debug, Clone, Default)]
pub struct ExtractionRequest {
    pairs: Vec<(String, PathBuf)>,
}

impl ExtractionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry to extract to `destination`
    pub fn entry(mut self, entry: &str, destination: impl Into<PathBuf>) -> Self {
        self.pairs.push((entry.to_string(), destination.into()));
        self
    }

    pub fn pairs(&self) -> &[(String, PathBuf)] {
        &self.pairs
    }
}

/// Materializes archive entries on disk
pub trait Extractor {
    /// Whether `archive` has an entry named `entry`
    fn contains(&self, archive: &Path, entry: &str) -> Result<bool>;

    /// Extract every pair of `request`
    fn extract(&self, archive: &Path, request: &ExtractionRequest) -> Result<()>;
}

/// Extractor for zip archives
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipExtractor;

impl ZipExtractor {
    fn open(archive: &Path) -> Result<ZipArchive<File>> {
        let file = File::open(archive).map_err(|e| failure("archive", archive, e))?;
        ZipArchive::new(file).map_err(|e| failure("archive", archive, e))
    }

    fn extract_one(
        zip: &mut ZipArchive<File>,
        archive: &Path,
        entry: &str,
        destination: &Path,
    ) -> Result<()> {
        let mut file = zip.by_name(entry).map_err(|e| match e {
            ZipError::FileNotFound => failure(entry, archive, "entry not found"),
            other => failure(entry, archive, other),
        })?;

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| failure(entry, archive, e))?;
        }

        let mut out = File::create(destination).map_err(|e| failure(entry, archive, e))?;
        io::copy(&mut file, &mut out).map_err(|e| failure(entry, archive, e))?;

        if let Some(mode) = file.unix_mode() {
            fs::set_permissions(destination, fs::Permissions::from_mode(mode & 0o7777))
                .map_err(|e| failure(entry, archive, e))?;
        }

        verify_readable(destination).map_err(|e| failure(entry, archive, e))
    }
}

impl Extractor for ZipExtractor {
    fn contains(&self, archive: &Path, entry: &str) -> Result<bool> {
        let zip = Self::open(archive)?;
        Ok(zip.index_for_name(entry).is_some())
    }

    fn extract(&self, archive: &Path, request: &ExtractionRequest) -> Result<()> {
        let mut zip = Self::open(archive)?;
        for (entry, destination) in request.pairs() {
            log::debug!(
                "Extracting {entry} from {} to {}",
                archive.display(),
                destination.display()
            );
            Self::extract_one(&mut zip, archive, entry, destination)?;
        }
        Ok(())
    }
}

fn failure(entry: &str, archive: &Path, reason: impl std::fmt::Display) -> InstallerError {
    InstallerError::ExtractionFailed {
        entry: entry.to_string(),
        archive: archive.display().to_string(),
        reason: reason.to_string(),
    }
}

fn verify_readable(path: &Path) -> io::Result<()> {
    if !fs::metadata(path)?.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "extracted entry is not a regular file",
        ));
    }
    File::open(path).map(drop)
}
