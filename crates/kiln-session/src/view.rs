//! The Staging Filesystem operation contract, exposed as a safe in-process
//! API (`JobView`) rather than a FUSE/ptrace/interposition transport.
//!
//! Wiring `JobView` up to an actual transport that intercepts a job
//! process's filesystem calls is left to a process-launch subsystem outside
//! this crate; `JobView` only has to be an honest, testable implementation
//! of the routing and write-path contracts a transport would delegate to.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read as _, Seek, SeekFrom, Write as _};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use kiln_cas::{BlobStore, ContentHash};
use thiserror::Error;

use crate::staged::{JobId, JobSession, StagedItem};

#[derive(Error, Debug)]
pub enum ViewError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("path not visible to this job: {0}")]
    Eacces(String),

    #[error("path not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, ViewError>;

/// Kind reported by [`JobView::getattr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    File,
    Directory,
    Symlink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr {
    pub size: u64,
    pub mode: u32,
    pub kind: AttrKind,
}

/// An open handle returned by `open`/`create`.
pub struct Handle {
    file: File,
    /// Set for handles opened against a staged file, so `release` can find
    /// the item again to decrement `open_count`.
    staged_dest: Option<String>,
}

impl Handle {
    pub fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(self.file.read(buf)?)
    }

    pub fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(self.file.write(buf)?)
    }
}

/// Safe in-process implementation of the Staging Filesystem contract for a
/// single job session.
pub struct JobView<'a> {
    store: &'a BlobStore,
    session: &'a mut JobSession,
    staging_counter: &'a AtomicU64,
}

impl<'a> JobView<'a> {
    pub fn new(store: &'a BlobStore, session: &'a mut JobSession, staging_counter: &'a AtomicU64) -> Self {
        Self { store, session, staging_counter }
    }

    fn next_staging_path(&self) -> PathBuf {
        let id = self.staging_counter.fetch_add(1, Ordering::Relaxed);
        self.store.root().join("staging").join(id.to_string())
    }

    /// Resolve routing per the policy: staged -> visible-with-hash -> visible -> EACCES.
    fn route(&self, path: &str) -> Route {
        if self.session.staged.contains_key(path) {
            Route::Staged
        } else if self.session.visible_hashes.contains_key(path) {
            Route::CasServed
        } else if self.session.visible.contains(path) {
            Route::Workspace
        } else {
            Route::Denied
        }
    }

    pub fn getattr(&mut self, path: &str) -> Result<Attr> {
        self.session.reads.insert(path.to_string());
        match self.route(path) {
            Route::Staged => match self.session.staged.get(path).unwrap() {
                StagedItem::File { staging_path, mode, .. } => {
                    let meta = fs::metadata(staging_path)?;
                    Ok(Attr { size: meta.len(), mode: *mode, kind: AttrKind::File })
                }
                StagedItem::Directory { mode, .. } => {
                    Ok(Attr { size: 0, mode: *mode, kind: AttrKind::Directory })
                }
                StagedItem::Symlink { target, .. } => {
                    Ok(Attr { size: target.len() as u64, mode: 0o777, kind: AttrKind::Symlink })
                }
            },
            Route::CasServed => {
                let hash = self.session.visible_hashes[path];
                if self.store.has(&hash) {
                    let size = fs::metadata(self.store.path_of(&hash))?.len();
                    Ok(Attr { size, mode: 0o444, kind: AttrKind::File })
                } else {
                    self.workspace_getattr(path)
                }
            }
            Route::Workspace => self.workspace_getattr(path),
            Route::Denied => Err(ViewError::Eacces(path.to_string())),
        }
    }

    fn workspace_getattr(&self, path: &str) -> Result<Attr> {
        let meta = fs::metadata(path)?;
        let mode = workspace_mode(&meta);
        Ok(Attr { size: meta.len(), mode, kind: AttrKind::File })
    }

    /// Open an existing path for reading.
    pub fn open(&mut self, path: &str) -> Result<Handle> {
        self.session.reads.insert(path.to_string());
        match self.route(path) {
            Route::Staged => match self.session.staged.get(path) {
                Some(StagedItem::File { staging_path, .. }) => {
                    let file = File::open(staging_path)?;
                    Ok(Handle { file, staged_dest: Some(path.to_string()) })
                }
                _ => Err(ViewError::NotFound(path.to_string())),
            },
            Route::CasServed => {
                let hash = self.session.visible_hashes[path];
                if self.store.has(&hash) {
                    let file = File::open(self.store.path_of(&hash))?;
                    Ok(Handle { file, staged_dest: None })
                } else {
                    let file = File::open(path)?;
                    Ok(Handle { file, staged_dest: None })
                }
            }
            Route::Workspace => {
                let file = File::open(path)?;
                Ok(Handle { file, staged_dest: None })
            }
            Route::Denied => Err(ViewError::Eacces(path.to_string())),
        }
    }

    /// Create a new staged file and return a handle for writing.
    pub fn create(&mut self, path: &str, mode: u32) -> Result<Handle> {
        self.session.writes.insert(path.to_string());
        let staging_path = self.next_staging_path();
        if let Some(parent) = staging_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&staging_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&staging_path, fs::Permissions::from_mode(0o644))?;
        }

        self.session.staged.insert(
            path.to_string(),
            StagedItem::File {
                staging_path,
                dest_path: path.to_string(),
                mode: mode & 0o7777,
                mtime_sec: 0,
                mtime_nsec: 0,
                open_count: 1,
                job_id: self.session.job_id.clone(),
            },
        );

        Ok(Handle { file, staged_dest: Some(path.to_string()) })
    }

    pub fn read(&mut self, handle: &mut Handle, buf: &mut [u8], offset: u64) -> Result<usize> {
        handle.read_at(buf, offset)
    }

    pub fn write(&mut self, handle: &mut Handle, buf: &[u8], offset: u64) -> Result<usize> {
        handle.write_at(buf, offset)
    }

    /// Release an open handle. No hashing, no CAS insertion happens here —
    /// the staging file is left exactly as written for the Post-Processor.
    pub fn release(&mut self, handle: Handle) -> Result<()> {
        if let Some(dest) = handle.staged_dest {
            if let Some(StagedItem::File { open_count, .. }) = self.session.staged.get_mut(&dest) {
                *open_count = open_count.saturating_sub(1);
            }
        }
        drop(handle.file);
        Ok(())
    }

    pub fn chmod(&mut self, path: &str, mode: u32) -> Result<()> {
        if let Some(item) = self.session.staged.get_mut(path) {
            match item {
                StagedItem::File { mode: m, staging_path, .. } => {
                    *m = mode & 0o7777;
                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::PermissionsExt;
                        match fs::set_permissions(staging_path, fs::Permissions::from_mode(mode & 0o7777)) {
                            Ok(()) => {}
                            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                            Err(e) => return Err(ViewError::Io(e)),
                        }
                    }
                }
                StagedItem::Directory { mode: m, .. } => *m = mode & 0o7777,
                StagedItem::Symlink { .. } => {}
            }
            return Ok(());
        }
        // Visible-with-hash or workspace: no-op with regard to the blob itself.
        Ok(())
    }

    pub fn utimens(&mut self, path: &str, atime: (i64, u32), mtime: (i64, u32)) -> Result<()> {
        let _ = atime;
        if let Some(StagedItem::File { mtime_sec, mtime_nsec, staging_path, .. }) =
            self.session.staged.get_mut(path)
        {
            *mtime_sec = mtime.0;
            *mtime_nsec = mtime.1;
            let _ = staging_path;
        }
        Ok(())
    }

    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.session.rename_staged(from, to);
        Ok(())
    }

    pub fn unlink(&mut self, path: &str) -> Result<()> {
        if let Some(item) = self.session.staged.remove(path) {
            if let StagedItem::File { staging_path, .. } = item {
                match fs::remove_file(staging_path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(ViewError::Io(e)),
                }
            }
        }
        Ok(())
    }

    pub fn symlink(&mut self, target: &[u8], path: &str) -> Result<()> {
        self.session.writes.insert(path.to_string());
        self.session.staged.insert(
            path.to_string(),
            StagedItem::Symlink {
                dest_path: path.to_string(),
                target: target.to_vec(),
                job_id: self.session.job_id.clone(),
            },
        );
        Ok(())
    }

    pub fn readlink(&mut self, path: &str) -> Result<Vec<u8>> {
        match self.route(path) {
            Route::Staged => match self.session.staged.get(path) {
                Some(StagedItem::Symlink { target, .. }) => Ok(target.clone()),
                _ => Err(ViewError::NotFound(path.to_string())),
            },
            Route::CasServed | Route::Workspace => {
                let target = fs::read_link(path)?;
                Ok(target.to_string_lossy().into_owned().into_bytes())
            }
            Route::Denied => Err(ViewError::Eacces(path.to_string())),
        }
    }

    pub fn mkdir(&mut self, path: &str, mode: u32) -> Result<()> {
        self.session.writes.insert(path.to_string());
        self.session.staged.insert(
            path.to_string(),
            StagedItem::Directory {
                dest_path: path.to_string(),
                mode: mode & 0o7777,
                job_id: self.session.job_id.clone(),
            },
        );
        Ok(())
    }
}

enum Route {
    Staged,
    CasServed,
    Workspace,
    Denied,
}

#[cfg(unix)]
fn workspace_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn workspace_mode(_meta: &fs::Metadata) -> u32 {
    0o644
}
