//! Common file system operations
//!
//! Directory copies here preserve ownership, permissions, timestamps and
//! extended attributes, and recreate device nodes rather than reading them.

use std::ffi::CString;
use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io::{self, BufRead, BufReader};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::sys::stat::{Mode, SFlag, mknod};
use walkdir::WalkDir;

/// What a copy carries over besides file contents
#[derive(Debug, Default, Clone, Copy)]
pub struct CopyOptions {
    /// Ownership, permission bits and timestamps
    pub attributes: bool,
    /// Extended attributes (including SELinux labels)
    pub xattrs: bool,
}

impl CopyOptions {
    /// Preserve everything the sandbox needs to look like the host
    pub fn preserve_all() -> Self {
        Self {
            attributes: true,
            xattrs: true,
        }
    }
}

/// Copy the contents of `src` into `dst`, excluding `src` itself.
///
/// `dst` is created if missing.
pub fn copy_dir_contents(src: &Path, dst: &Path, options: CopyOptions) -> io::Result<()> {
    if !src.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", src.display()),
        ));
    }
    if !dst.is_dir() {
        fs::create_dir_all(dst)?;
    }

    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        copy_entry(entry.path(), &dst.join(relative), options)?;
    }

    Ok(())
}

/// Copy a single file, symlink or special file
pub fn copy_file(src: &Path, dst: &Path, options: CopyOptions) -> io::Result<()> {
    copy_entry(src, dst, options)
}

fn copy_entry(src: &Path, dst: &Path, options: CopyOptions) -> io::Result<()> {
    let meta = fs::symlink_metadata(src)?;
    let file_type = meta.file_type();

    if file_type.is_dir() {
        if !dst.is_dir() {
            fs::create_dir(dst)?;
        }
    } else if file_type.is_file() {
        fs::copy(src, dst)?;
    } else if file_type.is_symlink() {
        remove_if_present(dst)?;
        std::os::unix::fs::symlink(fs::read_link(src)?, dst)?;
    } else if file_type.is_char_device() || file_type.is_block_device() || file_type.is_fifo() {
        remove_if_present(dst)?;
        let rdev = libc::dev_t::try_from(meta.rdev())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        mknod(
            dst,
            SFlag::from_bits_truncate(meta.mode() & libc::S_IFMT),
            Mode::from_bits_truncate(meta.mode() & 0o7777),
            rdev,
        )?;
    } else {
        log::debug!("Skipping socket {}", src.display());
        return Ok(());
    }

    if options.attributes {
        copy_attributes(dst, &meta)?;
    }
    if options.xattrs {
        copy_xattrs(src, dst)?;
    }
    Ok(())
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn c_path(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

fn copy_attributes(dst: &Path, meta: &fs::Metadata) -> io::Result<()> {
    std::os::unix::fs::lchown(dst, Some(meta.uid()), Some(meta.gid()))?;

    if !meta.file_type().is_symlink() {
        fs::set_permissions(dst, fs::Permissions::from_mode(meta.mode() & 0o7777))?;
    }

    let times = [
        libc::timespec {
            tv_sec: meta.atime(),
            tv_nsec: meta.atime_nsec(),
        },
        libc::timespec {
            tv_sec: meta.mtime(),
            tv_nsec: meta.mtime_nsec(),
        },
    ];
    let path = c_path(dst)?;
    // SAFETY: `path` is a valid C string and `times` holds two timespecs.
    let ret = unsafe {
        libc::utimensat(
            libc::AT_FDCWD,
            path.as_ptr(),
            times.as_ptr(),
            libc::AT_SYMLINK_NOFOLLOW,
        )
    };
    if ret != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ENOTSUP) {
            return Err(err);
        }
    }
    Ok(())
}

fn xattr_unsupported(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::ENOTSUP | libc::ENODATA))
}

fn copy_xattrs(src: &Path, dst: &Path) -> io::Result<()> {
    let c_src = c_path(src)?;
    let c_dst = c_path(dst)?;

    // SAFETY: a null buffer of length zero asks for the required size.
    let size = unsafe { libc::llistxattr(c_src.as_ptr(), std::ptr::null_mut(), 0) };
    if size < 0 {
        let err = io::Error::last_os_error();
        return if xattr_unsupported(&err) { Ok(()) } else { Err(err) };
    }
    if size == 0 {
        return Ok(());
    }

    let mut names = vec![0u8; size.unsigned_abs()];
    // SAFETY: `names` is writable for its full length.
    let size = unsafe {
        libc::llistxattr(
            c_src.as_ptr(),
            names.as_mut_ptr().cast::<libc::c_char>(),
            names.len(),
        )
    };
    if size < 0 {
        return Err(io::Error::last_os_error());
    }
    names.truncate(size.unsigned_abs());

    for name in names.split(|&b| b == 0).filter(|n| !n.is_empty()) {
        let c_name =
            CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        // SAFETY: size query with a null buffer.
        let len = unsafe { libc::lgetxattr(c_src.as_ptr(), c_name.as_ptr(), std::ptr::null_mut(), 0) };
        if len < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ENODATA) {
                continue;
            }
            return Err(err);
        }

        let mut value = vec![0u8; len.unsigned_abs()];
        // SAFETY: `value` is writable for its full length.
        let len = unsafe {
            libc::lgetxattr(
                c_src.as_ptr(),
                c_name.as_ptr(),
                value.as_mut_ptr().cast::<libc::c_void>(),
                value.len(),
            )
        };
        if len < 0 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: `value` holds `len` initialized bytes.
        let ret = unsafe {
            libc::lsetxattr(
                c_dst.as_ptr(),
                c_name.as_ptr(),
                value.as_ptr().cast::<libc::c_void>(),
                len.unsigned_abs(),
                0,
            )
        };
        if ret != 0 {
            let err = io::Error::last_os_error();
            if !xattr_unsupported(&err) {
                return Err(err);
            }
        }
    }
    Ok(())
}

/// Create `path` as an empty regular file, truncating any existing one
pub fn create_empty_file(path: &Path) -> io::Result<()> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map(drop)
}

/// Create a directory (and parents) with `mode` if it does not exist
pub fn ensure_dir(path: &Path, mode: u32) -> io::Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    DirBuilder::new().recursive(true).mode(mode).create(path)
}

/// Create the parent directory of `path` with `mode`
pub fn ensure_parent(path: &Path, mode: u32) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir(parent, mode),
        _ => Ok(()),
    }
}

/// Set permission bits on `path`
pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

/// First line of a text file without its line terminator
pub fn first_line(path: &Path) -> io::Result<String> {
    let mut line = String::new();
    BufReader::new(File::open(path)?).read_line(&mut line)?;
    Ok(line.trim_end_matches(['\n', '\r']).to_string())
}

/// Recursively delete `path`; a missing path is not an error.
///
/// Refuses to delete anything when an entry below `path` lives on another
/// filesystem, i.e. something is still mounted inside the tree.
pub fn remove_tree(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
        Ok(meta) if meta.is_dir() => {
            check_single_filesystem(path, meta.dev())?;
            fs::remove_dir_all(path)
        }
        Ok(_) => fs::remove_file(path),
    }
}

fn check_single_filesystem(root: &Path, dev: u64) -> io::Result<()> {
    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.metadata().map_err(io::Error::from)?.dev() != dev {
            return Err(io::Error::other(format!(
                "{} is on another filesystem",
                entry.path().display()
            )));
        }
    }
    Ok(())
}

/// Absolute form of `path` with symlinks resolved in the part that exists.
///
/// Trailing components that do not exist yet are appended unchanged.
pub fn resolve(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(canonical) = fs::canonicalize(existing) {
            return missing
                .iter()
                .rev()
                .fold(canonical, |resolved, name| resolved.join(name));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return absolute,
        }
    }
}
