use std::{fmt::Display, io, path::Path, path::PathBuf};

use log::debug;
use sha1::{Digest as _, Sha1};
use tokio::io::AsyncReadExt;

/// The default chunk size used to read files.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Printed in place of a digest for files that could not be hashed.
const MISSING_DIGEST: &str = "_";

/// Raised when a local file cannot be hashed.
#[derive(Debug, thiserror::Error)]
#[error("Failed to read {}, {source}", .filepath.display())]
pub struct LocalStateError {
    pub filepath: PathBuf,
    #[source]
    pub source: io::Error,
}

/// The SHA-1 digest of a local file, or the marker for a file that could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalDigest {
    Present(String),
    Missing,
}

impl LocalDigest {
    /// Compares against a manifest digest. A missing file never matches.
    pub fn matches(&self, expected: &str) -> bool {
        match self {
            LocalDigest::Present(digest) => digest.eq_ignore_ascii_case(expected),
            LocalDigest::Missing => false,
        }
    }
}

impl Display for LocalDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocalDigest::Present(digest) => write!(f, "{}", digest),
            LocalDigest::Missing => write!(f, "{}", MISSING_DIGEST),
        }
    }
}

/// Hashes the file at `filepath`, treating unreadable files as missing.
pub async fn local_digest(filepath: &Path) -> LocalDigest {
    match sha1_file(filepath, DEFAULT_CHUNK_SIZE).await {
        Ok(digest) => LocalDigest::Present(hex::encode(digest)),
        Err(err) => {
            debug!("{}", err);
            LocalDigest::Missing
        }
    }
}

/// Calculates the SHA1 checksum of a file.
pub async fn sha1_file(filepath: &Path, chunk_size: usize) -> Result<Vec<u8>, LocalStateError> {
    let unreadable = |source| LocalStateError {
        filepath: filepath.to_path_buf(),
        source,
    };

    if !filepath.is_file() {
        return Err(unreadable(io::Error::new(
            io::ErrorKind::NotFound,
            "not a file",
        )));
    }

    let mut file = tokio::fs::File::open(filepath).await.map_err(unreadable)?;
    let mut hasher = Sha1::new();
    let mut buffer = vec![0; chunk_size.max(1)];

    loop {
        let bytes_read = file.read(&mut buffer).await.map_err(unreadable)?;
        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().to_vec())
}
