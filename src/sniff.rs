//! Detection of the AROMA interactive installer
//!
//! AROMA takes over the screen and input for as long as the user clicks
//! through it, so the recovery must be frozen while it runs. Detection is a
//! plain substring search for strings the AROMA engine embeds in its binary.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use memchr::memmem::Finder;

use crate::error::{Result, resource};

/// Signature strings, searched in order
pub const AROMA_MARKERS: [&str; 8] = [
    "AROMA Installer",
    "support@amarullz.com",
    "(c) 2013 by amarullz xda-developers",
    "META-INF/com/google/android/aroma-config",
    "META-INF/com/google/android/aroma",
    "AROMA_NAME",
    "AROMA_BUILD",
    "AROMA_VERSION",
];

const CHUNK_SIZE: usize = 64 * 1024;

/// Result of scanning an installer binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// An interactive installer, identified by `marker`
    Interactive { marker: &'static str },
    Plain,
}

#[cfg(test)]
impl Classification {
    pub fn is_interactive(self) -> bool {
        matches!(self, Self::Interactive { .. })
    }
}

/// Classify the file at `path`
pub fn classify(path: &Path) -> Result<Classification> {
    let file = File::open(path).map_err(|e| resource::read_failed(path, e))?;
    scan(file).map_err(|e| resource::read_failed(path, e))
}

/// Stream `reader` through the marker search.
///
/// Consecutive windows overlap by the longest marker minus one byte so that
/// markers spanning a chunk boundary are still found.
pub fn scan(mut reader: impl Read) -> io::Result<Classification> {
    let finders: Vec<(&'static str, Finder<'static>)> = AROMA_MARKERS
        .iter()
        .map(|&m| (m, Finder::new(m.as_bytes())))
        .collect();
    let overlap = AROMA_MARKERS.iter().map(|m| m.len()).max().unwrap_or(1) - 1;

    let mut window = Vec::with_capacity(CHUNK_SIZE + overlap);
    let mut chunk = vec![0u8; CHUNK_SIZE];
    loop {
        let read = match reader.read(&mut chunk) {
            Ok(0) => return Ok(Classification::Plain),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        window.extend_from_slice(&chunk[..read]);

        if let Some(&(marker, _)) = finders.iter().find(|(_, f)| f.find(&window).is_some()) {
            return Ok(Classification::Interactive { marker });
        }

        let keep = window.len().min(overlap);
        window.drain(..window.len() - keep);
    }
}
