// File: manager/src/pipeline/encryption.rs
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::{with_suffix, PartialOutput};
use crate::commands::run_command;
use crate::config::{EncryptionConfig, Secret};
use crate::constants::{defaults, layout};
use crate::errors::PipelineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptionOutcome {
    Encrypted(PathBuf),
    /// No key configured; the artifact stays as it was
    Skipped,
}

/// The passphrase written to a 0600 temp file for the duration of one gpg
/// call. The file is removed when the guard drops, on every exit path.
pub struct PassphraseFile {
    file: NamedTempFile,
}

impl PassphraseFile {
    pub fn create(secret: &Secret, dir: &Path) -> std::io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix(".passphrase")
            .tempfile_in(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(secret.expose().as_bytes())?;
        file.flush()?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Symmetric AES256 encryption through gpg
#[derive(Clone)]
pub struct Encryptor {
    key: Option<Secret>,
    gpg_binary: String,
    scratch_dir: PathBuf,
}

impl Encryptor {
    /// `scratch_dir` receives the short-lived passphrase files
    pub fn new(key: Option<Secret>, gpg_binary: impl Into<String>, scratch_dir: PathBuf) -> Self {
        Self {
            key,
            gpg_binary: gpg_binary.into(),
            scratch_dir,
        }
    }

    /// `enabled` is the environment check's verdict; false drops the key
    pub fn from_config(config: &EncryptionConfig, enabled: bool, scratch_dir: PathBuf) -> Self {
        let key = if enabled { config.key.clone() } else { None };
        Self::new(key, config.gpg_binary.clone(), scratch_dir)
    }

    pub fn disabled() -> Self {
        Self::new(None, defaults::GPG_BINARY, std::env::temp_dir())
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Encrypt `path` into `<path>.gpg` and remove the plaintext
    pub async fn encrypt(&self, path: &Path) -> Result<EncryptionOutcome, PipelineError> {
        let key = match &self.key {
            Some(key) => key,
            None => {
                debug!("No encryption key, leaving {} unencrypted", path.display());
                return Ok(EncryptionOutcome::Skipped);
            }
        };

        let output = with_suffix(path, layout::GPG_SUFFIX);
        let partial = PartialOutput::new(with_suffix(&output, layout::PARTIAL_SUFFIX));
        let failed = |reason: String| PipelineError::Encryption {
            path: path.to_path_buf(),
            reason,
        };

        {
            let passphrase =
                PassphraseFile::create(key, &self.scratch_dir).map_err(|e| failed(e.to_string()))?;
            let mut args = self.base_args(passphrase.path());
            args.extend([
                OsString::from("--symmetric"),
                OsString::from("--cipher-algo"),
                OsString::from("AES256"),
                OsString::from("--output"),
                partial.path().as_os_str().to_os_string(),
                path.as_os_str().to_os_string(),
            ]);
            run_command(&self.gpg_binary, &args, &[])
                .await
                .map_err(|e| failed(e.to_string()))?;
        }

        tokio::fs::rename(partial.path(), &output)
            .await
            .map_err(|e| failed(e.to_string()))?;
        partial.disarm();
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| failed(e.to_string()))?;

        info!("✓ Encrypted {}", output.display());
        Ok(EncryptionOutcome::Encrypted(output))
    }

    /// Decrypt `input` into `output`; the input is left untouched
    pub async fn decrypt(&self, input: &Path, output: &Path) -> Result<(), PipelineError> {
        let key = self.key.as_ref().ok_or_else(|| PipelineError::MissingKey {
            path: input.to_path_buf(),
        })?;
        let failed = |reason: String| PipelineError::Decryption {
            path: input.to_path_buf(),
            reason,
        };

        let passphrase =
            PassphraseFile::create(key, &self.scratch_dir).map_err(|e| failed(e.to_string()))?;
        let mut args = self.base_args(passphrase.path());
        args.extend([
            OsString::from("--decrypt"),
            OsString::from("--output"),
            output.as_os_str().to_os_string(),
            input.as_os_str().to_os_string(),
        ]);
        let result = run_command(&self.gpg_binary, &args, &[]).await;
        drop(passphrase);

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(output).await;
            return Err(failed(e.to_string()));
        }
        debug!("Decrypted {} into {}", input.display(), output.display());
        Ok(())
    }

    fn base_args(&self, passphrase_file: &Path) -> Vec<OsString> {
        vec![
            OsString::from("--batch"),
            OsString::from("--yes"),
            OsString::from("--quiet"),
            OsString::from("--pinentry-mode"),
            OsString::from("loopback"),
            OsString::from("--passphrase-file"),
            passphrase_file.as_os_str().to_os_string(),
        ]
    }
}
