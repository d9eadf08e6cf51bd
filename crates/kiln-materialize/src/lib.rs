//! # kiln-materialize
//!
//! Installs a Manifest's declared outputs into the workspace, pulling blob
//! content from the local Blob Store (ingesting staging files into it first
//! if they aren't already there).
//!
//! Grounded on this codebase's link-farm populate step, but generalized to
//! reflink-or-copy installs (never hardlinks — see `kiln_cas`'s materialize
//! contract) and to the three manifest entry kinds rather than files alone.

use std::fs;
use std::path::Path;

use filetime::FileTime;
use kiln_cas::{BlobStore, CasError, ContentHash};
use kiln_manifest::{Manifest, ManifestEntry};
use thiserror::Error;
use tracing::{instrument, warn};

#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CAS error: {0}")]
    Cas(#[from] CasError),

    #[error("integrity error for {dest_path}: expected {expected}, got {actual}")]
    IntegrityError { dest_path: String, expected: String, actual: String },
}

pub type Result<T> = std::result::Result<T, MaterializeError>;

/// Install every entry of `manifest` into the workspace rooted at
/// `workspace_root`, in manifest order (alphabetical by dest path).
///
/// The first entry whose materialization fails stops the run and returns
/// its error; entries already materialized are left in place (the build
/// driver above this core treats the job, not the individual output, as the
/// unit of atomicity).
#[instrument(skip(store, manifest), fields(entries = manifest.len()))]
pub fn materialize_manifest(store: &BlobStore, manifest: &Manifest, workspace_root: &Path) -> Result<()> {
    for (dest_path, entry) in manifest.iter() {
        materialize_entry(store, dest_path, entry, workspace_root)?;
    }
    Ok(())
}

fn materialize_entry(
    store: &BlobStore,
    dest_path: &str,
    entry: &ManifestEntry,
    workspace_root: &Path,
) -> Result<()> {
    let dest = workspace_root.join(dest_path);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o755))?;
        }
    }

    match entry {
        ManifestEntry::File { staging_path, mode, mtime_sec, mtime_nsec, hash } => {
            materialize_file(store, staging_path, &dest, dest_path, *mode, *mtime_sec, *mtime_nsec, hash)
        }
        ManifestEntry::Symlink { target } => materialize_symlink(&dest, target),
        ManifestEntry::Directory { mode } => materialize_directory(&dest, *mode),
    }
}

#[allow(clippy::too_many_arguments)]
fn materialize_file(
    store: &BlobStore,
    staging_path: &Path,
    dest: &Path,
    dest_path: &str,
    mode: u32,
    mtime_sec: i64,
    mtime_nsec: u32,
    expected_hash: &ContentHash,
) -> Result<()> {
    let (actual_hash, _method) = store.put_file(staging_path)?;
    if actual_hash != *expected_hash {
        return Err(MaterializeError::IntegrityError {
            dest_path: dest_path.to_string(),
            expected: expected_hash.to_hex(),
            actual: actual_hash.to_hex(),
        });
    }

    store.materialize(&actual_hash, dest, mode)?;

    let ft = FileTime::from_unix_time(mtime_sec, mtime_nsec);
    filetime::set_file_times(dest, ft, ft)?;

    if let Err(e) = fs::remove_file(staging_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %staging_path.display(), error = %e, "failed to remove staging file after materialization");
        }
    }

    Ok(())
}

fn materialize_symlink(dest: &Path, target: &str) -> Result<()> {
    if dest.symlink_metadata().is_ok() {
        fs::remove_file(dest)?;
    }
    #[cfg(unix)]
    std::os::unix::fs::symlink(target, dest)?;
    #[cfg(not(unix))]
    fs::write(dest, target)?;
    Ok(())
}

fn materialize_directory(dest: &Path, mode: u32) -> Result<()> {
    match fs::symlink_metadata(dest) {
        Ok(meta) if meta.is_dir() => {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(dest, fs::Permissions::from_mode(mode & 0o7777))?;
            }
        }
        Ok(_) => {
            fs::remove_file(dest)?;
            create_dir_with_mode(dest, mode)?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            create_dir_with_mode(dest, mode)?;
        }
        Err(e) => return Err(MaterializeError::Io(e)),
    }
    Ok(())
}

fn create_dir_with_mode(dest: &Path, mode: u32) -> Result<()> {
    match fs::create_dir(dest) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(MaterializeError::Io(e)),
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dest, fs::Permissions::from_mode(mode & 0o7777))?;
    }
    Ok(())
}
