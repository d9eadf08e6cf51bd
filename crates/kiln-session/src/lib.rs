//! # kiln-session
//!
//! Job sessions, the Staging Filesystem contract (`JobView`), and the Job
//! Post-Processor. This crate owns everything that happens between a job
//! being admitted and its Manifest being handed to the Materializer.

pub mod postprocess;
pub mod staged;
pub mod view;

pub use postprocess::finalize;
pub use staged::{JobId, JobSession, StagedItem};
pub use view::{Attr, AttrKind, Handle, JobView, ViewError};

use std::collections::HashMap;
use std::fs;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};

use kiln_cas::{BlobStore, ContentHash};
use kiln_manifest::Manifest;

/// Owns the Blob Store handle, the staging-id counter, and the table of
/// live sessions. Created once per process (or per test); no global state.
pub struct JobSessionManager {
    store: Arc<BlobStore>,
    staging_counter: AtomicU64,
    sessions: Mutex<HashMap<JobId, Mutex<JobSession>>>,
}

impl JobSessionManager {
    pub fn new(store: Arc<BlobStore>) -> Self {
        Self {
            store,
            staging_counter: AtomicU64::new(0),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<BlobStore> {
        &self.store
    }

    /// Admit a new job, returning its id.
    pub fn admit(&self, job_id: JobId) {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.insert(job_id.clone(), Mutex::new(JobSession::new(job_id)));
    }

    /// Mark a path visible to a job, optionally with a required content hash.
    pub fn set_visible(&self, job_id: &JobId, path: impl Into<String>, hash: Option<ContentHash>) {
        let sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.get(job_id) {
            session.lock().unwrap().mark_visible(path, hash);
        }
    }

    /// Run `f` with a [`JobView`] bound to `job_id`'s session.
    pub fn with_view<R>(&self, job_id: &JobId, f: impl FnOnce(&mut JobView) -> R) -> Option<R> {
        let sessions = self.sessions.lock().unwrap();
        let session_lock = sessions.get(job_id)?;
        let mut session = session_lock.lock().unwrap();
        let mut view = JobView::new(&self.store, &mut session, &self.staging_counter);
        Some(f(&mut view))
    }

    /// Finalize a session into a Manifest via the Post-Processor. Does not
    /// remove the session; callers typically follow with `abandon` or feed
    /// the manifest straight to a Materializer and clean up afterward.
    pub fn finalize(&self, job_id: &JobId) -> Option<Result<Manifest, view::ViewError>> {
        let sessions = self.sessions.lock().unwrap();
        let session = sessions.get(job_id)?.lock().unwrap();
        Some(postprocess::finalize(&session))
    }

    /// Abandon a session: unlink every staging file it owns and drop its
    /// state. Blobs already inserted into the store are unaffected.
    pub fn abandon(&self, job_id: &JobId) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session_lock) = sessions.remove(job_id) {
            let session = session_lock.into_inner().unwrap();
            for item in session.staged.values() {
                if let StagedItem::File { staging_path, .. } = item {
                    let _ = fs::remove_file(staging_path);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn admit_finalize_and_abandon_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(BlobStore::open(dir.path()).unwrap());
        let manager = JobSessionManager::new(store);

        let job = JobId::new("job-1");
        manager.admit(job.clone());

        manager.with_view(&job, |view| {
            let mut handle = view.create("out/a.txt", 0o644).unwrap();
            view.write(&mut handle, b"hello\n", 0).unwrap();
            view.release(handle).unwrap();
        });

        let manifest = manager.finalize(&job).unwrap().unwrap();
        assert_eq!(manifest.outputs, vec!["out/a.txt"]);

        manager.abandon(&job);
        assert!(manager.with_view(&job, |_| ()).is_none());
    }

    #[test]
    fn two_sessions_writing_same_dest_path_stay_isolated_until_finalize() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(BlobStore::open(dir.path()).unwrap());
        let manager = JobSessionManager::new(store);

        let job_a = JobId::new("a");
        let job_b = JobId::new("b");
        manager.admit(job_a.clone());
        manager.admit(job_b.clone());

        manager.with_view(&job_a, |view| {
            let mut h = view.create("build/x", 0o644).unwrap();
            view.write(&mut h, b"from a", 0).unwrap();
            view.release(h).unwrap();
        });
        manager.with_view(&job_b, |view| {
            let mut h = view.create("build/x", 0o644).unwrap();
            view.write(&mut h, b"from b", 0).unwrap();
            view.release(h).unwrap();
        });

        let manifest_a = manager.finalize(&job_a).unwrap().unwrap();
        let manifest_b = manager.finalize(&job_b).unwrap().unwrap();

        use kiln_manifest::ManifestEntry;
        let hash_a = match manifest_a.get("build/x").unwrap() {
            ManifestEntry::File { hash, .. } => *hash,
            _ => unreachable!(),
        };
        let hash_b = match manifest_b.get("build/x").unwrap() {
            ManifestEntry::File { hash, .. } => *hash,
            _ => unreachable!(),
        };
        assert_ne!(hash_a, hash_b);
    }
}
