//! Mount table parsing
//!
//! `/proc/self/mounts` lines are `source target fstype options dump pass`
//! with whitespace and backslashes in paths escaped as three-digit octal.
//! Paths are raw bytes and need not be UTF-8.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};

/// Undo the kernel's octal escaping (`\040` for space and so on)
pub fn unescape(field: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(field.len());
    let mut i = 0;
    while i < field.len() {
        if field[i] == b'\\' && i + 3 < field.len() && is_octal_escape(&field[i + 1..i + 4]) {
            let value = (field[i + 1] - b'0') * 64 + (field[i + 2] - b'0') * 8 + (field[i + 3] - b'0');
            out.push(value);
            i += 4;
        } else {
            out.push(field[i]);
            i += 1;
        }
    }
    out
}

fn is_octal_escape(digits: &[u8]) -> bool {
    digits.len() == 3
        && digits[0] <= b'3'
        && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}

/// Mount targets listed in a mounts file; malformed lines are skipped
pub fn parse(content: &[u8]) -> Vec<PathBuf> {
    content
        .split(|&b| b == b'\n')
        .filter_map(|line| {
            let mut fields = line
                .split(u8::is_ascii_whitespace)
                .filter(|field| !field.is_empty());
            let _source = fields.next()?;
            let target = fields.next()?;
            fields.next()?;
            Some(PathBuf::from(OsString::from_vec(unescape(target))))
        })
        .collect()
}

/// Read and parse a mounts file
pub fn read(path: &Path) -> io::Result<Vec<PathBuf>> {
    Ok(parse(&fs::read(path)?))
}
