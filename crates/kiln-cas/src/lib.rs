//! # kiln-cas
//!
//! Content-addressable blob store for the build staging core.
//!
//! Blobs are addressed by BLAKE2b-256 digest and stored under a 2-level
//! fan-out directory layout:
//!
//! ```text
//! <root>/
//! ├── blobs/
//! │   └── ab/
//! │       └── cd1234...ef/   # remaining 62 hex chars
//! └── staging/                # scratch area for in-flight writes
//! ```
//!
//! Every insertion lands in `staging/` first under a unique name and is moved
//! into place with a single `rename`, so a reader never observes a
//! partially-written blob. If the destination already exists (the content is
//! already present), the store treats that as success and discards the
//! staged copy rather than erroring — two writers racing to insert identical
//! content both succeed.

pub mod copy;
pub mod hash;

pub use copy::IngestMethod;
pub use hash::{ContentHash, InvalidHex};

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::instrument;

/// Errors that can occur during CAS operations.
#[derive(Error, Debug)]
pub enum CasError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("blob not found: {hash}")]
    NotFound { hash: String },

    #[error("invalid hash: {0}")]
    InvalidHash(#[from] InvalidHex),
}

pub type Result<T> = std::result::Result<T, CasError>;

/// A content-addressable blob store rooted at a single directory.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open (creating if necessary) a blob store rooted at `root`.
    ///
    /// Creates `root/blobs` and `root/staging` up front so later operations
    /// never need to special-case a missing top-level directory.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("blobs"))?;
        fs::create_dir_all(root.join("staging"))?;
        Ok(Self { root })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, hash: &ContentHash) -> PathBuf {
        let (prefix, suffix) = hash.shard();
        self.root.join("blobs").join(prefix).join(suffix)
    }

    fn staging_path(&self) -> PathBuf {
        let name = format!(
            "{}-{:?}-{}",
            std::process::id(),
            std::thread::current().id(),
            STAGING_COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
        );
        self.root.join("staging").join(name)
    }

    /// Path a blob with `hash` would live at, regardless of whether it
    /// currently exists.
    pub fn path_of(&self, hash: &ContentHash) -> PathBuf {
        self.blob_path(hash)
    }

    /// Whether a blob with `hash` is already present.
    pub fn has(&self, hash: &ContentHash) -> bool {
        self.blob_path(hash).exists()
    }

    /// Insert bytes into the store, returning their content hash.
    ///
    /// No-op (beyond the hash computation) if the content is already
    /// present: this is the store's dedup-by-presence guarantee.
    #[instrument(skip(self, data), level = "debug")]
    pub fn put_bytes(&self, data: &[u8]) -> Result<ContentHash> {
        let hash = ContentHash::hash_bytes(data);
        let dest = self.blob_path(&hash);
        if dest.exists() {
            return Ok(hash);
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let staging = self.staging_path();
        let mut file = File::create(&staging)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        self.commit_staged(&staging, &dest)?;
        Ok(hash)
    }

    /// Ingest an existing file into the store by content.
    ///
    /// Copies `src` into a unique staging temp first and hashes *that* copy,
    /// rather than hashing `src` directly — the bytes that ended up on disk
    /// in the store are what get named, not whatever `src` happened to
    /// contain at the moment of the read. Leaves `src` untouched either way.
    ///
    /// Returns the hash and which ingest strategy actually moved the bytes.
    #[instrument(skip(self), level = "debug")]
    pub fn put_file(&self, path: &Path) -> Result<(ContentHash, IngestMethod)> {
        let staging = self.staging_path();
        let mode = fs::metadata(path)?.permissions();
        #[cfg(unix)]
        let mode_bits = {
            use std::os::unix::fs::PermissionsExt;
            mode.mode()
        };
        #[cfg(not(unix))]
        let mode_bits = 0o644;

        let method = copy::fast_copy_with_mode(path, &staging, mode_bits)?;
        let hash = ContentHash::hash_file(&staging)?;
        let dest = self.blob_path(&hash);

        if dest.exists() {
            let _ = fs::remove_file(&staging);
            return Ok((hash, method));
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        self.commit_staged(&staging, &dest)?;
        Ok((hash, method))
    }

    /// Move a fully-written staging file into its final blob path.
    ///
    /// If another writer raced us and already installed the same content,
    /// the staged copy is discarded rather than treated as an error.
    fn commit_staged(&self, staging: &Path, dest: &Path) -> Result<()> {
        match fs::rename(staging, dest) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = fs::remove_file(staging);
                if dest.exists() {
                    Ok(())
                } else {
                    Err(CasError::Io(e))
                }
            }
        }
    }

    /// Read a blob's full contents.
    #[instrument(skip(self), level = "debug")]
    pub fn read(&self, hash: &ContentHash) -> Result<Vec<u8>> {
        let path = self.blob_path(hash);
        let mut file = File::open(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                CasError::NotFound { hash: hash.to_hex() }
            } else {
                CasError::Io(e)
            }
        })?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Materialize a blob at `dest`, reflinking or copying it out of the
    /// store and applying `mode`.
    ///
    /// Writes to a sibling temp path inside `dest`'s parent and renames over
    /// `dest`, so a concurrent reader of the old `dest` is never caught
    /// mid-write; this mirrors the atomic-swap contract `put_bytes`/
    /// `put_file` rely on for insertion. Hardlinking straight to the blob is
    /// deliberately not offered here: a hardlinked destination shares an
    /// inode with the blob, so any later `chmod`/`utimens` on the
    /// destination (routine during materialization) would mutate the blob
    /// itself and every other destination sharing that inode.
    #[instrument(skip(self), level = "debug")]
    pub fn materialize(&self, hash: &ContentHash, dest: &Path, mode: u32) -> Result<IngestMethod> {
        let src = self.blob_path(hash);
        if !src.exists() {
            return Err(CasError::NotFound { hash: hash.to_hex() });
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = match dest.parent() {
            Some(parent) => parent.join(format!(
                ".kiln-materialize-{}-{:?}",
                std::process::id(),
                std::thread::current().id()
            )),
            None => dest.with_extension("kiln-tmp"),
        };
        let _ = fs::remove_file(&tmp);

        let method = copy::fast_copy_with_mode(&src, &tmp, mode)?;
        fs::rename(&tmp, dest)?;
        Ok(method)
    }
}

static STAGING_COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
