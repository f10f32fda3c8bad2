//! Content fingerprinting.
//!
//! A [`Fingerprint`] is the lowercase hex SHA-256 of a file's bytes. Input is
//! consumed in fixed-size blocks so large PDFs never have to be held in
//! memory at once.

use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Read;
use std::path::Path;

use crate::error::{IngestError, Result};

/// Read block size for incremental hashing.
const BLOCK_SIZE: usize = 4096;

/// Fixed-length digest of file content, used as a change-detection key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an already-computed hex digest (e.g. read back from the ledger).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash everything `reader` yields until EOF.
pub fn hash_reader<R: Read>(mut reader: R) -> Result<Fingerprint> {
    let mut hasher = Sha256::new();
    let mut block = [0u8; BLOCK_SIZE];
    loop {
        let n = match reader.read(&mut block) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(IngestError::Storage(format!("read failed: {}", e))),
        };
        hasher.update(&block[..n]);
    }
    Ok(Fingerprint(hex::encode(hasher.finalize())))
}

/// Hash the file at `path`.
pub fn hash_file(path: &Path) -> Result<Fingerprint> {
    let file = std::fs::File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => IngestError::NotFound(format!("{}: {}", path.display(), e)),
        _ => IngestError::Storage(format!("{}: {}", path.display(), e)),
    })?;
    hash_reader(std::io::BufReader::new(file))
}
