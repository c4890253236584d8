//! Content hashing: a cheap sampled quick hash and a full streaming hash.
//!
//! Both hashes are 128-bit BLAKE3 digests (the XOF output truncated to 16
//! bytes). The quick hash only looks at three fixed windows of a large file,
//! so equal quick hashes are a candidate signal and must be confirmed with
//! the full hash before two files are treated as identical.

use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use blake3::Hasher as Blake3Hasher;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Digest length in bytes.
pub const DIGEST_LEN: usize = 16;

/// A 128-bit content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest(pub [u8; DIGEST_LEN]);

impl Digest {
    /// Rebuild a digest from a stored blob. Returns `None` on a length mismatch.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; DIGEST_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

/// Result of a quick hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuickHash {
    /// The sampled digest
    pub digest: Digest,
    /// File size observed while hashing
    pub size: u64,
    /// True when the file was small enough to be hashed in full, in which case
    /// `digest` is also the file's full hash.
    pub covers_whole_file: bool,
}

/// Computes quick and full content hashes with a fixed block size.
#[derive(Debug, Clone)]
pub struct ContentHasher {
    block_size: u64,
}

impl ContentHasher {
    /// Create a hasher. Changing `block_size` changes every quick hash.
    pub fn new(block_size: u64) -> Self {
        Self {
            block_size: block_size.max(1),
        }
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Stream the whole file through the digest.
    pub fn full_hash(&self, path: &Path) -> Result<Digest, PipelineError> {
        let io_err = |source| PipelineError::Hash {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).map_err(io_err)?;
        let mut hasher = Blake3Hasher::new();
        let mut buffer = vec![0u8; self.block_size as usize];
        loop {
            let bytes_read = file.read(&mut buffer).map_err(io_err)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }
        Ok(finish(&hasher))
    }

    /// Hash the first block, the block starting at the midpoint and the last
    /// block. Files smaller than three blocks are hashed in full.
    pub fn quick_hash(&self, path: &Path) -> Result<QuickHash, PipelineError> {
        let size = std::fs::metadata(path)
            .map_err(|source| PipelineError::Hash {
                path: path.to_path_buf(),
                source,
            })?
            .len();

        if size < 3 * self.block_size {
            return Ok(QuickHash {
                digest: self.full_hash(path)?,
                size,
                covers_whole_file: true,
            });
        }

        let io_err = |source| PipelineError::Hash {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).map_err(io_err)?;
        let mut hasher = Blake3Hasher::new();
        let mut buffer = vec![0u8; self.block_size as usize];
        for offset in [0, size / 2, size - self.block_size] {
            file.seek(SeekFrom::Start(offset)).map_err(io_err)?;
            file.read_exact(&mut buffer).map_err(io_err)?;
            hasher.update(&buffer);
        }

        Ok(QuickHash {
            digest: finish(&hasher),
            size,
            covers_whole_file: false,
        })
    }
}

fn finish(hasher: &Blake3Hasher) -> Digest {
    let mut out = [0u8; DIGEST_LEN];
    hasher.finalize_xof().fill(&mut out);
    Digest(out)
}
