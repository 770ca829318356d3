// File: manager/src/pipeline/mod.rs
//! Write path (dump, compress, encrypt) and its exact mirror on read
//! (decrypt, decompress).

pub mod compression;
pub mod dump;
pub mod encryption;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::artifact::sealed_flags;
use crate::config::Config;
use crate::constants::layout;
use crate::engine::DatabaseEngine;
use crate::errors::{ManagerError, PipelineError};

pub use compression::{compress, decompress, test_decompress};
pub use dump::DumpEngine;
pub use encryption::{EncryptionOutcome, Encryptor, PassphraseFile};

/// Removes a file on drop unless disarmed
pub struct PartialOutput {
    path: PathBuf,
    armed: bool,
}

impl PartialOutput {
    pub fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the file and hand back its path
    pub fn disarm(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for PartialOutput {
    fn drop(&mut self) {
        if self.armed && self.path.exists() {
            match std::fs::remove_file(&self.path) {
                Ok(()) => debug!("Removed partial output {}", self.path.display()),
                Err(e) => warn!("Could not remove partial output {}: {}", self.path.display(), e),
            }
        }
    }
}

pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Final artifact produced by the write path
#[derive(Debug, Clone)]
pub struct SealedArtifact {
    pub path: PathBuf,
    pub compressed: bool,
    pub encrypted: bool,
}

/// Plain dump recovered from an artifact. The scratch directory holding it
/// is deleted when this value drops.
pub struct UnsealedArchive {
    workdir: TempDir,
    path: PathBuf,
}

impl UnsealedArchive {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }
}

/// Compress, then encrypt when a key is configured
pub async fn seal(
    path: &Path,
    level: u32,
    encryptor: &Encryptor,
) -> Result<SealedArtifact, PipelineError> {
    let compressed = compress(path, level).await?;
    let guard = PartialOutput::new(compressed);

    match encryptor.encrypt(guard.path()).await? {
        EncryptionOutcome::Encrypted(encrypted) => {
            // encrypt() already removed the compressed plaintext
            guard.disarm();
            Ok(SealedArtifact {
                path: encrypted,
                compressed: true,
                encrypted: true,
            })
        }
        EncryptionOutcome::Skipped => Ok(SealedArtifact {
            path: guard.disarm(),
            compressed: true,
            encrypted: false,
        }),
    }
}

/// Decrypt, then decompress, into a fresh directory under `scratch_root`.
/// The artifact itself is never modified.
pub async fn unseal(
    artifact: &Path,
    scratch_root: &Path,
    encryptor: &Encryptor,
) -> Result<UnsealedArchive, PipelineError> {
    let file_name = artifact
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let (compressed, encrypted) = sealed_flags(&file_name);

    let workdir = tempfile::Builder::new()
        .prefix("unseal_")
        .tempdir_in(scratch_root)?;
    let mut current = artifact.to_path_buf();

    if encrypted {
        let decrypted = workdir.path().join("decrypted");
        encryptor.decrypt(&current, &decrypted).await?;
        current = decrypted;
    }

    let plain = workdir.path().join(format!("plain{}", layout::DUMP_SUFFIX));
    if compressed {
        decompress(&current, &plain).await?;
    } else {
        tokio::fs::copy(&current, &plain).await?;
    }
    if current != artifact {
        let _ = tokio::fs::remove_file(&current).await;
    }

    debug!("Unsealed {} into {}", artifact.display(), plain.display());
    Ok(UnsealedArchive {
        workdir,
        path: plain,
    })
}

/// Dump, compress and encrypt in the fixed order
#[derive(Clone)]
pub struct Pipeline {
    dumper: DumpEngine,
    compression_level: u32,
    encryptor: Encryptor,
    staging_root: PathBuf,
}

impl Pipeline {
    pub fn new(engine: Arc<dyn DatabaseEngine>, config: &Config, encryptor: Encryptor) -> Self {
        Self {
            dumper: DumpEngine::new(engine, config.parallel_jobs),
            compression_level: config.compression_level,
            encryptor,
            staging_root: config.staging_dir(),
        }
    }

    pub fn encryptor(&self) -> &Encryptor {
        &self.encryptor
    }

    /// Produce a sealed artifact next to `output`, named `<output>.gz[.gpg]`.
    ///
    /// Dump and seal happen in a private directory under staging; only the
    /// finished artifact is renamed into place. Nothing is left on disk when
    /// any stage fails.
    pub async fn produce(&self, database: &str, output: &Path) -> Result<SealedArtifact, ManagerError> {
        let (destination_dir, file_name) = match (output.parent(), output.file_name()) {
            (Some(dir), Some(name)) => (dir, name),
            _ => {
                return Err(ManagerError::Other(format!(
                    "Invalid artifact path {}",
                    output.display()
                )))
            }
        };

        tokio::fs::create_dir_all(&self.staging_root)
            .await
            .map_err(PipelineError::from)?;
        let workdir = tempfile::Builder::new()
            .prefix("dump_")
            .tempdir_in(&self.staging_root)
            .map_err(PipelineError::from)?;

        let staged = workdir.path().join(file_name);
        self.dumper.create_dump(database, &staged).await?;
        let sealed = seal(&staged, self.compression_level, &self.encryptor).await?;

        let sealed_name = sealed
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        let destination = destination_dir.join(sealed_name);
        tokio::fs::rename(&sealed.path, &destination)
            .await
            .map_err(PipelineError::from)?;
        debug!("Moved {} into {}", sealed.path.display(), destination.display());

        Ok(SealedArtifact {
            path: destination,
            ..sealed
        })
    }

    pub async fn unseal(
        &self,
        artifact: &Path,
        scratch_root: &Path,
    ) -> Result<UnsealedArchive, PipelineError> {
        unseal(artifact, scratch_root, &self.encryptor).await
    }
}
