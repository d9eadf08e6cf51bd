//! Job Post-Processor: turns a finished session's staged items into a
//! Manifest, hashing file contents but never touching the Blob Store.
//!
//! Keeping CAS I/O out of this step lets it run on a remote executor that
//! doesn't share a filesystem with the store — the Materializer is the only
//! component that needs `put_file`/`materialize`, and it accepts either
//! staging files or blobs transported in from elsewhere.

use kiln_cas::ContentHash;
use kiln_manifest::{Manifest, ManifestEntry};
use rayon::prelude::*;

use crate::staged::{JobSession, StagedItem};
use crate::view::ViewError;

/// Hash every staged file (in parallel) and assemble the alphabetically
/// ordered manifest the Materializer will later consume.
pub fn finalize(session: &JobSession) -> Result<Manifest, ViewError> {
    let items: Vec<&StagedItem> = session.staged.values().collect();

    let hashed: Vec<(String, ManifestEntry)> = items
        .par_iter()
        .map(|item| -> Result<(String, ManifestEntry), ViewError> {
            let entry = match item {
                StagedItem::File { staging_path, mode, mtime_sec, mtime_nsec, .. } => {
                    let hash = ContentHash::hash_file(staging_path)?;
                    ManifestEntry::File {
                        staging_path: staging_path.clone(),
                        mode: *mode,
                        mtime_sec: *mtime_sec,
                        mtime_nsec: *mtime_nsec,
                        hash,
                    }
                }
                StagedItem::Symlink { target, .. } => ManifestEntry::Symlink {
                    target: String::from_utf8_lossy(target).into_owned(),
                },
                StagedItem::Directory { mode, .. } => ManifestEntry::Directory { mode: *mode },
            };
            Ok((item.dest_path().to_string(), entry))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut manifest = Manifest::new();
    manifest.inputs = session.reads.clone().into_iter().collect();
    for (dest_path, entry) in hashed {
        manifest.insert(dest_path, entry);
    }
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staged::JobId;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn finalize_hashes_files_and_preserves_other_kinds() {
        let dir = TempDir::new().unwrap();
        let staging_path = dir.path().join("staged-0");
        fs::write(&staging_path, b"finalize me").unwrap();

        let mut session = JobSession::new(JobId::new("job-1"));
        session.staged.insert(
            "out/f.txt".to_string(),
            StagedItem::File {
                staging_path: staging_path.clone(),
                dest_path: "out/f.txt".to_string(),
                mode: 0o644,
                mtime_sec: 0,
                mtime_nsec: 0,
                open_count: 0,
                job_id: JobId::new("job-1"),
            },
        );
        session.staged.insert(
            "out/d".to_string(),
            StagedItem::Directory {
                dest_path: "out/d".to_string(),
                mode: 0o755,
                job_id: JobId::new("job-1"),
            },
        );

        let manifest = finalize(&session).unwrap();
        assert_eq!(manifest.outputs, vec!["out/d", "out/f.txt"]);

        match manifest.get("out/f.txt").unwrap() {
            ManifestEntry::File { hash, .. } => {
                assert_eq!(*hash, ContentHash::hash_bytes(b"finalize me"));
            }
            _ => panic!("expected file entry"),
        }
        assert!(manifest.get("out/d").unwrap().is_directory());
        assert!(staging_path.exists(), "post-processor must not delete staging files");
    }
}
