//! Staged items and the per-job session state that tracks them.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use kiln_cas::ContentHash;

/// Identifies a job across its lifetime. Opaque to everything but the Job
/// Session Manager, which allocates one per admitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An item a job has created within its session, not yet materialized.
///
/// Mirrors [`kiln_manifest::ManifestEntry`]'s shape but carries the extra
/// bookkeeping (`staging_path`, `open_count`) the Post-Processor strips away
/// when it turns staged items into manifest entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedItem {
    File {
        staging_path: PathBuf,
        dest_path: String,
        mode: u32,
        mtime_sec: i64,
        mtime_nsec: u32,
        open_count: u32,
        job_id: JobId,
    },
    Symlink {
        dest_path: String,
        target: Vec<u8>,
        job_id: JobId,
    },
    Directory {
        dest_path: String,
        mode: u32,
        job_id: JobId,
    },
}

impl StagedItem {
    pub fn dest_path(&self) -> &str {
        match self {
            StagedItem::File { dest_path, .. } => dest_path,
            StagedItem::Symlink { dest_path, .. } => dest_path,
            StagedItem::Directory { dest_path, .. } => dest_path,
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            StagedItem::File { job_id, .. } => job_id,
            StagedItem::Symlink { job_id, .. } => job_id,
            StagedItem::Directory { job_id, .. } => job_id,
        }
    }

    fn set_dest_path(&mut self, new_dest: String) {
        match self {
            StagedItem::File { dest_path, .. } => *dest_path = new_dest,
            StagedItem::Symlink { dest_path, .. } => *dest_path = new_dest,
            StagedItem::Directory { dest_path, .. } => *dest_path = new_dest,
        }
    }
}

/// State a job accumulates over its lifetime: what it may read, what it has
/// produced, and what it has actually touched.
#[derive(Debug)]
pub struct JobSession {
    pub job_id: JobId,
    /// Paths the job is permitted to read.
    pub visible: HashSet<String>,
    /// dest_path -> hash, for CAS-served reads. A path with no entry here
    /// (but present in `visible`) falls back to the workspace.
    pub visible_hashes: HashMap<String, ContentHash>,
    /// dest_path -> item the job has created within this session.
    pub staged: HashMap<String, StagedItem>,
    /// Paths actually observed via `read`/`getattr`, for reporting.
    pub reads: HashSet<String>,
    /// Paths actually written via `write`/`create`/`mkdir`/`symlink`, for reporting.
    pub writes: HashSet<String>,
}

impl JobSession {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            visible: HashSet::new(),
            visible_hashes: HashMap::new(),
            staged: HashMap::new(),
            reads: HashSet::new(),
            writes: HashSet::new(),
        }
    }

    pub fn mark_visible(&mut self, path: impl Into<String>, hash: Option<ContentHash>) {
        let path = path.into();
        if let Some(hash) = hash {
            self.visible_hashes.insert(path.clone(), hash);
        }
        self.visible.insert(path);
    }

    /// Move a staged item from `from` to `to`, updating its recorded
    /// `dest_path`. No-op (returns `false`) if `from` isn't staged.
    pub fn rename_staged(&mut self, from: &str, to: &str) -> bool {
        if let Some(mut item) = self.staged.remove(from) {
            item.set_dest_path(to.to_string());
            self.staged.insert(to.to_string(), item);
            true
        } else {
            false
        }
    }
}
