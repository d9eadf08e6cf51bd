//! Command-line driver for the staging core.
//!
//! This binary is not a build orchestrator; it's a thin harness that
//! exercises the library crates the way an orchestrator would: `ingest`
//! stores files directly into the Blob Store, `run-session` drives a
//! `JobView` the way a sandboxed job process would, `materialize` installs a
//! manifest's outputs into a workspace, and `stats` reports on the Blob
//! Store's state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use kiln_cas::BlobStore;
use kiln_config::logging::{init_logging, LogLevel};
use kiln_config::Config;
use kiln_manifest::Manifest;
use kiln_session::{JobId, JobSessionManager};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "kiln", about = "Content-addressable staging and materialization core")]
struct Cli {
    /// Override the Blob Store root (defaults to config resolution).
    #[arg(long, global = true)]
    cas_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a project config template to `.kiln/config.toml`.
    Init,

    /// Store a file or directory tree directly into the Blob Store.
    Ingest {
        /// File or directory to ingest.
        path: PathBuf,
    },

    /// Stage a directory's worth of files through a `JobView`, as a job
    /// process would, then finalize into a manifest file.
    RunSession {
        /// Directory whose contents become the job's staged outputs.
        source: PathBuf,

        /// Where to write the resulting manifest JSON.
        #[arg(long, default_value = "manifest.json")]
        out: PathBuf,
    },

    /// Install a manifest's declared outputs into a workspace directory.
    Materialize {
        /// Manifest JSON produced by `run-session`.
        manifest: PathBuf,

        /// Workspace directory to materialize into.
        workspace: PathBuf,
    },

    /// Report on the Blob Store's on-disk state.
    Stats,
}

fn main() -> Result<()> {
    init_logging(LogLevel::Info);

    let cli = Cli::parse();
    let config = Config::load().context("loading config")?;
    let cas_root = cli.cas_root.unwrap_or_else(|| config.cas_root());

    match cli.command {
        Commands::Init => cmd_init(),
        Commands::Ingest { path } => cmd_ingest(&cas_root, &path),
        Commands::RunSession { source, out } => cmd_run_session(&cas_root, &source, &out),
        Commands::Materialize { manifest, workspace } => cmd_materialize(&cas_root, &manifest, &workspace),
        Commands::Stats => cmd_stats(&cas_root),
    }
}

fn cmd_init() -> Result<()> {
    std::fs::create_dir_all(".kiln")?;
    let path = Path::new(".kiln/config.toml");
    if path.exists() {
        bail!(".kiln/config.toml already exists");
    }
    std::fs::write(path, Config::init_toml())?;
    println!("wrote {}", path.display());
    Ok(())
}

fn cmd_ingest(cas_root: &Path, path: &Path) -> Result<()> {
    let store = BlobStore::open(cas_root)?;

    if path.is_file() {
        let (hash, method) = store.put_file(path)?;
        println!("{}  {} ({method})", hash.to_hex(), path.display());
        return Ok(());
    }

    for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let (hash, method) = store.put_file(entry.path())?;
        println!("{}  {} ({method})", hash.to_hex(), entry.path().display());
    }
    Ok(())
}

fn cmd_run_session(cas_root: &Path, source: &Path, out: &Path) -> Result<()> {
    let store = Arc::new(BlobStore::open(cas_root)?);
    let manager = JobSessionManager::new(store);

    let job_id = JobId::new(format!("cli-{}", std::process::id()));
    manager.admit(job_id.clone());

    for entry in WalkDir::new(source).into_iter().filter_map(|e| e.ok()) {
        let rel = entry.path().strip_prefix(source).unwrap_or(entry.path());
        if rel.as_os_str().is_empty() {
            continue;
        }
        let dest_path = rel.to_string_lossy().replace('\\', "/");
        let file_type = entry.file_type();

        let staged = manager.with_view(&job_id, |view| -> Result<(), anyhow::Error> {
            if file_type.is_symlink() {
                let target = std::fs::read_link(entry.path())?;
                view.symlink(target.to_string_lossy().as_bytes(), &dest_path)?;
            } else if file_type.is_dir() {
                view.mkdir(&dest_path, 0o755)?;
            } else if file_type.is_file() {
                let contents = std::fs::read(entry.path())?;
                let mut handle = view.create(&dest_path, 0o644)?;
                view.write(&mut handle, &contents, 0)?;
                view.release(handle)?;
            }
            Ok(())
        });
        match staged {
            Some(result) => result?,
            None => bail!("job session {job_id} was abandoned mid-run"),
        }
    }

    let manifest = manager
        .finalize(&job_id)
        .with_context(|| format!("job session {job_id} not found"))?
        .context("finalizing session")?;
    manifest.save(out)?;
    println!(
        "wrote {} ({} entries) from job {job_id}",
        out.display(),
        manifest.len()
    );
    Ok(())
}

fn cmd_materialize(cas_root: &Path, manifest_path: &Path, workspace: &Path) -> Result<()> {
    let store = BlobStore::open(cas_root)?;
    let manifest = Manifest::load(manifest_path)?;
    kiln_materialize::materialize_manifest(&store, &manifest, workspace)?;
    println!("materialized {} entries into {}", manifest.len(), workspace.display());
    Ok(())
}

fn cmd_stats(cas_root: &Path) -> Result<()> {
    let store = BlobStore::open(cas_root)?;
    let staging_dir = store.root().join("staging");
    let mut blob_count = 0u64;
    let mut total_bytes = 0u64;

    for entry in WalkDir::new(store.root())
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        if entry.path().starts_with(&staging_dir) {
            continue;
        }
        blob_count += 1;
        total_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
    }

    println!("cas root:    {}", store.root().display());
    println!("blob count:  {blob_count}");
    println!("total bytes: {total_bytes}");
    Ok(())
}
