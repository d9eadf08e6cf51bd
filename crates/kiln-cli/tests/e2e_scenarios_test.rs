//! End-to-end scenarios wiring all four crates together: sessions stage
//! outputs through a `JobView`, the post-processor turns them into a
//! manifest, and the materializer installs that manifest into a workspace.
//!
//! These exercise the literal scenarios the core's invariants are built
//! around rather than any single crate's internals in isolation.

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;

    use kiln_cas::BlobStore;
    use kiln_manifest::Manifest;
    use kiln_materialize::materialize_manifest;
    use kiln_session::{JobId, JobSessionManager};
    use tempfile::TempDir;

    fn new_store(dir: &Path) -> BlobStore {
        BlobStore::open(dir.join("cas")).unwrap()
    }

    fn stage_file(manager: &JobSessionManager, job: &JobId, dest: &str, contents: &[u8], mode: u32) {
        manager
            .with_view(job, |view| {
                let mut h = view.create(dest, mode).unwrap();
                view.write(&mut h, contents, 0).unwrap();
                view.release(h).unwrap();
            })
            .unwrap();
    }

    fn materialize_job(store: &BlobStore, manager: &JobSessionManager, job: &JobId, workspace: &Path) -> Manifest {
        let manifest = manager.finalize(job).unwrap().unwrap();
        materialize_manifest(store, &manifest, workspace).unwrap();
        manifest
    }

    #[test]
    fn s1_independent_jobs_distinct_outputs() {
        let root = TempDir::new().unwrap();
        let store = Arc::new(new_store(root.path()));
        let manager = JobSessionManager::new(Arc::clone(&store));
        let workspace = root.path().join("workspace");

        let job_a = JobId::new("job-a");
        let job_b = JobId::new("job-b");
        manager.admit(job_a.clone());
        manager.admit(job_b.clone());

        stage_file(&manager, &job_a, "build/a.txt", b"hello\n", 0o644);
        stage_file(&manager, &job_b, "build/b.txt", b"world\n", 0o600);

        let manifest_a = materialize_job(&store, &manager, &job_a, &workspace);
        let manifest_b = materialize_job(&store, &manager, &job_b, &workspace);

        assert_eq!(fs::read(workspace.join("build/a.txt")).unwrap(), b"hello\n");
        assert_eq!(fs::read(workspace.join("build/b.txt")).unwrap(), b"world\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode_a = fs::metadata(workspace.join("build/a.txt")).unwrap().permissions().mode() & 0o777;
            let mode_b = fs::metadata(workspace.join("build/b.txt")).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode_a, 0o644);
            assert_eq!(mode_b, 0o600);
        }

        let hash_a = match manifest_a.get("build/a.txt").unwrap() {
            kiln_manifest::ManifestEntry::File { hash, .. } => *hash,
            _ => unreachable!(),
        };
        let hash_b = match manifest_b.get("build/b.txt").unwrap() {
            kiln_manifest::ManifestEntry::File { hash, .. } => *hash,
            _ => unreachable!(),
        };
        assert_ne!(hash_a, hash_b);
        assert!(store.has(&hash_a));
        assert!(store.has(&hash_b));
    }

    #[test]
    fn s2_identical_outputs_dedup_to_one_blob() {
        let root = TempDir::new().unwrap();
        let store = Arc::new(new_store(root.path()));
        let manager = JobSessionManager::new(Arc::clone(&store));
        let workspace = root.path().join("workspace");

        let job_a = JobId::new("job-a");
        let job_b = JobId::new("job-b");
        manager.admit(job_a.clone());
        manager.admit(job_b.clone());

        stage_file(&manager, &job_a, "out/one.txt", b"same bytes", 0o644);
        stage_file(&manager, &job_b, "out/two.txt", b"same bytes", 0o644);

        let manifest_a = materialize_job(&store, &manager, &job_a, &workspace);
        let manifest_b = materialize_job(&store, &manager, &job_b, &workspace);

        let hash_a = match manifest_a.get("out/one.txt").unwrap() {
            kiln_manifest::ManifestEntry::File { hash, .. } => *hash,
            _ => unreachable!(),
        };
        let hash_b = match manifest_b.get("out/two.txt").unwrap() {
            kiln_manifest::ManifestEntry::File { hash, .. } => *hash,
            _ => unreachable!(),
        };
        assert_eq!(hash_a, hash_b);
        assert_eq!(fs::read(workspace.join("out/one.txt")).unwrap(), b"same bytes");
        assert_eq!(fs::read(workspace.join("out/two.txt")).unwrap(), b"same bytes");

        // Exactly one blob directory entry should exist for this hash; a second
        // put_bytes of identical content is a no-op, not a second insertion.
        let (prefix, suffix) = hash_a.shard();
        let blob_path = store.root().join("blobs").join(&prefix).join(&suffix);
        assert!(blob_path.is_file());
        let second_hash = store.put_bytes(b"same bytes").unwrap();
        assert_eq!(second_hash, hash_a);
    }

    #[test]
    fn s3_hash_served_read_ignores_workspace_race() {
        let root = TempDir::new().unwrap();
        let store = new_store(root.path());
        let workspace = root.path().join("workspace");
        fs::create_dir_all(&workspace).unwrap();
        let dest = workspace.join("build/x");

        let h1 = store.put_bytes(b"v1").unwrap();
        let h2 = store.put_bytes(b"v2").unwrap();

        store.materialize(&h1, &dest, 0o644).unwrap();
        store.materialize(&h2, &dest, 0o755).unwrap();
        // Workspace now holds "v2" after the second materializer won the race.
        assert_eq!(fs::read(&dest).unwrap(), b"v2");

        // A session told to read "build/x" at hash H1 must still see "v1",
        // regardless of what the workspace file currently holds.
        let manager = JobSessionManager::new(Arc::new(store));
        let job_c = JobId::new("job-c");
        manager.admit(job_c.clone());
        manager.set_visible(&job_c, "build/x", Some(h1));

        let observed = manager
            .with_view(&job_c, |view| {
                let mut handle = view.open("build/x").unwrap();
                let mut buf = [0u8; 16];
                let n = view.read(&mut handle, &mut buf, 0).unwrap();
                buf[..n].to_vec()
            })
            .unwrap();
        assert_eq!(observed, b"v1");
    }

    #[test]
    fn s4_cache_hit_rehydration_recreates_deleted_output() {
        let root = TempDir::new().unwrap();
        let store = new_store(root.path());
        let workspace = root.path().join("workspace");
        fs::create_dir_all(workspace.join("build")).unwrap();

        let h3 = store.put_bytes(b"cached output").unwrap();
        let dest = workspace.join("build/y");
        store.materialize(&h3, &dest, 0o644).unwrap();
        assert!(dest.exists());

        // Simulate the workspace file having been deleted out from under a
        // job-history record that still points at (path, hash, mode).
        fs::remove_file(&dest).unwrap();
        assert!(!dest.exists());
        assert!(store.has(&h3));

        store.materialize(&h3, &dest, 0o644).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"cached output");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&dest).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o644);
        }
    }

    #[test]
    fn s5_chmod_after_close_is_reflected_in_manifest_and_workspace() {
        let root = TempDir::new().unwrap();
        let store = Arc::new(new_store(root.path()));
        let manager = JobSessionManager::new(Arc::clone(&store));
        let workspace = root.path().join("workspace");

        let job = JobId::new("job-mode");
        manager.admit(job.clone());
        manager
            .with_view(&job, |view| {
                let h = view.create("o.o", 0o644).unwrap();
                view.release(h).unwrap();
                view.chmod("o.o", 0o600).unwrap();
            })
            .unwrap();

        let manifest = materialize_job(&store, &manager, &job, &workspace);
        match manifest.get("o.o").unwrap() {
            kiln_manifest::ManifestEntry::File { mode, .. } => assert_eq!(*mode, 0o600),
            _ => panic!("expected file entry"),
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(workspace.join("o.o")).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[test]
    fn s6_symlink_and_directory_materialize_alongside_a_file() {
        let root = TempDir::new().unwrap();
        let store = Arc::new(new_store(root.path()));
        let manager = JobSessionManager::new(Arc::clone(&store));
        let workspace = root.path().join("workspace");

        let job = JobId::new("job-mixed");
        manager.admit(job.clone());
        manager
            .with_view(&job, |view| {
                view.mkdir("build/d", 0o755).unwrap();
                view.symlink(b"../x", "build/d/link").unwrap();
                let mut h = view.create("build/d/f", 0o644).unwrap();
                view.write(&mut h, b"mixed contents", 0).unwrap();
                view.release(h).unwrap();
            })
            .unwrap();

        materialize_job(&store, &manager, &job, &workspace);

        assert!(workspace.join("build/d").is_dir());
        assert_eq!(fs::read(workspace.join("build/d/f")).unwrap(), b"mixed contents");
        assert_eq!(
            fs::read_link(workspace.join("build/d/link")).unwrap(),
            std::path::PathBuf::from("../x")
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let dir_mode = fs::metadata(workspace.join("build/d")).unwrap().permissions().mode() & 0o777;
            let file_mode = fs::metadata(workspace.join("build/d/f")).unwrap().permissions().mode() & 0o777;
            assert_eq!(dir_mode, 0o755);
            assert_eq!(file_mode, 0o644);
        }
    }

    #[test]
    fn staged_file_unlinked_before_materialization_leaves_no_trace() {
        let root = TempDir::new().unwrap();
        let store = Arc::new(new_store(root.path()));
        let manager = JobSessionManager::new(Arc::clone(&store));

        let job = JobId::new("job-unlink");
        manager.admit(job.clone());
        manager
            .with_view(&job, |view| {
                let h = view.create("scratch.tmp", 0o644).unwrap();
                view.release(h).unwrap();
                view.unlink("scratch.tmp").unwrap();
            })
            .unwrap();

        let manifest = manager.finalize(&job).unwrap().unwrap();
        assert!(manifest.is_empty());
    }
}
