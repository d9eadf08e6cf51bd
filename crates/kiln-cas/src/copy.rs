//! File copier: reflink-first, full-copy fallback, mode-preserving.
//!
//! Unlike this codebase's general-purpose reflink ingestion helper, the
//! fallback chain here stops at a full copy. Hardlinks are forbidden for CAS
//! materialization: a hardlink would share the inode with the blob, so a
//! per-destination `chmod` after install would silently corrupt the blob (or
//! every other destination sharing that inode).

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

/// Which strategy [`fast_copy_with_mode`] actually used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMethod {
    /// Zero-copy clone (FICLONE on Linux, clonefile on macOS).
    Reflink,
    /// Full data copy.
    Copy,
}

impl std::fmt::Display for IngestMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestMethod::Reflink => write!(f, "reflink"),
            IngestMethod::Copy => write!(f, "copy"),
        }
    }
}

const COPY_CHUNK: usize = 256 * 1024;

/// Copy `src` to `dst`, creating `dst` exclusively with the given mode.
///
/// Tries a reflink clone first; falls back to a full copy on any filesystem
/// that doesn't support it (`EOPNOTSUPP`/`ENOTSUP`/`EXDEV`). `dst` must not
/// already exist — this is an exclusive create, matching the `O_CREAT|O_EXCL`
/// contract callers rely on (the Blob Store always calls this against a
/// freshly-allocated unique temp path).
pub fn fast_copy_with_mode(src: &Path, dst: &Path, mode: u32) -> io::Result<IngestMethod> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }

    match try_reflink(src, dst, mode) {
        Ok(()) => return Ok(IngestMethod::Reflink),
        Err(ReflinkError::NotSupported) | Err(ReflinkError::CrossDevice) => {
            tracing::debug!(src = %src.display(), dst = %dst.display(), "reflink unavailable, falling back to copy");
        }
        Err(ReflinkError::Io(e)) => return Err(e),
    }

    copy_full(src, dst, mode)?;
    Ok(IngestMethod::Copy)
}

/// Reason a reflink attempt didn't produce a clone.
#[derive(Debug, thiserror::Error)]
enum ReflinkError {
    #[error("reflink not supported on this filesystem")]
    NotSupported,
    #[error("cross-device reflink not allowed")]
    CrossDevice,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn try_reflink(src: &Path, dst: &Path, mode: u32) -> Result<(), ReflinkError> {
    #[cfg(target_os = "linux")]
    {
        try_reflink_linux(src, dst, mode)
    }
    #[cfg(target_os = "macos")]
    {
        try_reflink_macos(src, dst, mode)
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        let _ = (src, dst, mode);
        Err(ReflinkError::NotSupported)
    }
}

#[cfg(target_os = "linux")]
fn try_reflink_linux(src: &Path, dst: &Path, mode: u32) -> Result<(), ReflinkError> {
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;

    const FICLONE: libc::c_ulong = 0x40049409;

    let src_file = File::open(src)?;
    let dst_file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode & 0o7777)
        .open(dst)?;

    let result = unsafe { libc::ioctl(dst_file.as_raw_fd(), FICLONE, src_file.as_raw_fd()) };

    if result == 0 {
        Ok(())
    } else {
        let err = io::Error::last_os_error();
        drop(dst_file);
        let _ = fs::remove_file(dst);
        match err.raw_os_error() {
            Some(libc::EXDEV) => Err(ReflinkError::CrossDevice),
            #[allow(unreachable_patterns)]
            Some(libc::EOPNOTSUPP) | Some(libc::ENOTSUP) => Err(ReflinkError::NotSupported),
            _ => Err(ReflinkError::Io(err)),
        }
    }
}

#[cfg(target_os = "macos")]
fn try_reflink_macos(src: &Path, dst: &Path, mode: u32) -> Result<(), ReflinkError> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::PermissionsExt;

    const CLONE_NOFOLLOW: u32 = 0x0001;

    extern "C" {
        fn clonefile(src: *const libc::c_char, dst: *const libc::c_char, flags: u32) -> libc::c_int;
    }

    if dst.exists() {
        return Err(ReflinkError::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "destination exists",
        )));
    }

    let src_cstr = CString::new(src.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid path"))?;
    let dst_cstr = CString::new(dst.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid path"))?;

    let result = unsafe { clonefile(src_cstr.as_ptr(), dst_cstr.as_ptr(), CLONE_NOFOLLOW) };

    if result == 0 {
        fs::set_permissions(dst, fs::Permissions::from_mode(mode & 0o7777))?;
        Ok(())
    } else {
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EXDEV) => Err(ReflinkError::CrossDevice),
            Some(libc::ENOTSUP) => Err(ReflinkError::NotSupported),
            _ => Err(ReflinkError::Io(err)),
        }
    }
}

/// Portable read/write loop, looping past short reads/writes until source EOF.
fn copy_full(src: &Path, dst: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut src_file = File::open(src)?;
    let mut dst_file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode & 0o7777)
        .open(dst)?;

    let mut buf = [0u8; COPY_CHUNK];
    loop {
        let n = src_file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        dst_file.write_all(&buf[..n])?;
    }
    dst_file.sync_all()?;
    Ok(())
}
