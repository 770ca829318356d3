// File: manager/src/verify/checksum.rs
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use crate::artifact::checksum_path_for;
use crate::errors::IntegrityError;

const READ_BUFFER: usize = 64 * 1024;

/// Streamed SHA-256 of a file, lowercase hex
pub async fn compute_sha256(path: &Path) -> io::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || sha256_blocking(&path))
        .await
        .map_err(io::Error::other)?
}

fn sha256_blocking(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Write `<artifact>.sha256` in sha256sum format and return the digest
pub async fn write_checksum_file(artifact: &Path) -> Result<String, IntegrityError> {
    let failed = |reason: String| IntegrityError::ChecksumWrite {
        path: artifact.to_path_buf(),
        reason,
    };
    let digest = compute_sha256(artifact)
        .await
        .map_err(|e| failed(e.to_string()))?;
    let file_name = artifact
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    tokio::fs::write(
        checksum_path_for(artifact),
        format!("{}  {}\n", digest, file_name),
    )
    .await
    .map_err(|e| failed(e.to_string()))?;
    Ok(digest)
}

/// Digest recorded in a sibling checksum file, if there is one
pub async fn read_checksum_file(artifact: &Path) -> io::Result<Option<String>> {
    let sibling: PathBuf = checksum_path_for(artifact);
    match tokio::fs::read_to_string(&sibling).await {
        Ok(content) => Ok(content
            .split_whitespace()
            .next()
            .map(|digest| digest.to_ascii_lowercase())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
