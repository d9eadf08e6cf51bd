//! Content hashing: BLAKE2b-256 digests with hex round-trip and shard splitting.
//!
//! Mirrors the hashing helpers this codebase keeps inline on `CasStore`, but
//! promoted to a standalone newtype so it can implement `Ord`/`Hash` and be
//! used as a map key or sorted directly, without callers reaching for a raw
//! `[u8; 32]`.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use digest::Digest;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// BLAKE2b-256 output size in bytes.
pub const HASH_LEN: usize = 32;

type Blake2b256 = blake2::Blake2b<blake2::digest::consts::U32>;

/// Chunk size used when streaming a file through the hasher.
const STREAM_CHUNK: usize = 64 * 1024;

/// A 256-bit content hash.
///
/// Equality and ordering are byte-lexicographic over the inner array, so
/// `ContentHash` sorts the same way its hex representation does and can be
/// used directly as a `BTreeMap`/`BTreeSet` key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ContentHash([u8; HASH_LEN]);

/// Errors parsing a hash from its hex representation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidHex {
    #[error("hash must be {expected} hex chars, got {actual}")]
    InvalidHexLength { expected: usize, actual: usize },
    #[error("invalid hex character {found:?} at position {pos}")]
    InvalidHexChar { found: char, pos: usize },
}

impl ContentHash {
    /// Hash a byte slice.
    pub fn hash_bytes(data: &[u8]) -> Self {
        let mut hasher = Blake2b256::new();
        hasher.update(data);
        let digest = hasher.finalize();
        let mut out = [0u8; HASH_LEN];
        out.copy_from_slice(&digest);
        Self(out)
    }

    /// Hash a file, streamed in fixed-size chunks rather than buffered whole.
    ///
    /// Makes no claim about atomicity with respect to concurrent writers of
    /// `path`; callers guarantee quiescence (staging files have exactly one
    /// writer at a time).
    pub fn hash_file(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut hasher = Blake2b256::new();
        let mut buf = [0u8; STREAM_CHUNK];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let digest = hasher.finalize();
        let mut out = [0u8; HASH_LEN];
        out.copy_from_slice(&digest);
        Ok(Self(out))
    }

    /// Raw bytes of the digest.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Canonical lowercase hex representation (64 chars).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a canonical hex representation.
    ///
    /// Case-insensitive on input; `to_hex` always emits lowercase.
    pub fn from_hex(s: &str) -> Result<Self, InvalidHex> {
        if s.len() != HASH_LEN * 2 {
            return Err(InvalidHex::InvalidHexLength {
                expected: HASH_LEN * 2,
                actual: s.len(),
            });
        }
        for (i, c) in s.chars().enumerate() {
            if !c.is_ascii_hexdigit() {
                return Err(InvalidHex::InvalidHexChar { found: c, pos: i });
            }
        }
        let mut out = [0u8; HASH_LEN];
        hex::decode_to_slice(s, &mut out).map_err(|_| InvalidHex::InvalidHexChar {
            found: s.chars().next().unwrap_or('\0'),
            pos: 0,
        })?;
        Ok(Self(out))
    }

    /// Split the hex form into `(shard_prefix, shard_suffix)`: the first two
    /// hex chars form the shard directory, the rest the entry name.
    pub fn shard(&self) -> (String, String) {
        let hex = self.to_hex();
        (hex[..2].to_string(), hex[2..].to_string())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<ContentHash> for String {
    fn from(h: ContentHash) -> Self {
        h.to_hex()
    }
}

impl TryFrom<String> for ContentHash {
    type Error = InvalidHex;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}
