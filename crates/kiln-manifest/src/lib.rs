//! # kiln-manifest
//!
//! Manifest data structures describing the outputs of a completed staging
//! job: one entry per dest path, tagged by kind (file/symlink/directory).
//!
//! The manifest is the handoff point between the Job Post-Processor (which
//! produces it from a session's staged items) and the Materializer (which
//! consumes it to install outputs into the workspace). Its in-memory form is
//! a `BTreeMap`, so iteration is always alphabetical by dest path without a
//! separate sort step; its wire form is the JSON object described in
//! `Manifest::load`/`Manifest::save`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use kiln_cas::ContentHash;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("entry not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, ManifestError>;

/// A single staged output, tagged by kind.
///
/// The `type` tag is kept in the wire format so external tooling that only
/// inspects the JSON (not this crate's types) can still dispatch on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ManifestEntry {
    File {
        staging_path: PathBuf,
        mode: u32,
        mtime_sec: i64,
        mtime_nsec: u32,
        hash: ContentHash,
    },
    Symlink {
        target: String,
    },
    Directory {
        mode: u32,
    },
}

impl ManifestEntry {
    pub fn is_file(&self) -> bool {
        matches!(self, ManifestEntry::File { .. })
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, ManifestEntry::Symlink { .. })
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, ManifestEntry::Directory { .. })
    }
}

/// The per-job result record: which paths were read, which were produced,
/// and the full per-path entry describing each output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// Workspace-relative paths the job read as inputs.
    #[serde(default)]
    pub inputs: BTreeSet<String>,
    /// Workspace-relative output paths, in canonical (alphabetical) order.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// dest_path -> entry. Backed by a `BTreeMap` so it serializes and
    /// iterates in alphabetical order with no extra sort step.
    #[serde(default)]
    pub staging_files: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, keeping `outputs` in sync with `staging_files`'s
    /// natural (alphabetical) order.
    pub fn insert(&mut self, dest_path: impl Into<String>, entry: ManifestEntry) {
        let dest_path = dest_path.into();
        self.staging_files.insert(dest_path, entry);
        self.outputs = self.staging_files.keys().cloned().collect();
    }

    pub fn get(&self, dest_path: &str) -> Option<&ManifestEntry> {
        self.staging_files.get(dest_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ManifestEntry)> {
        self.staging_files.iter()
    }

    pub fn len(&self) -> usize {
        self.staging_files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staging_files.is_empty()
    }

    /// Load a manifest from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let manifest = serde_json::from_reader(reader)?;
        Ok(manifest)
    }

    /// Save the manifest to a JSON file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}
