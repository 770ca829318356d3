// File: manager/src/config/secrets.rs
//! Secrets loader for the database password and the encryption passphrase.
//!
//! Secrets are stored in a separate TOML file (secrets.toml next to the main
//! config) that should be excluded from version control. Environment
//! variables still take precedence over anything loaded here.
//!
//! Example secrets.toml:
//! ```toml
//! [database]
//! password = "s3cret"
//!
//! [encryption]
//! key = "long-random-passphrase"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// A secret string that is zeroed on drop and never printed
#[derive(Clone)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("<redacted>")
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Secret::new)
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct DatabaseSecrets {
    pub password: Option<Secret>,
}

#[derive(Debug, Deserialize, Default)]
pub struct EncryptionSecrets {
    pub key: Option<Secret>,
}

/// Structure matching the secrets.toml file format
#[derive(Debug, Deserialize, Default)]
pub struct SecretsFile {
    #[serde(default)]
    pub database: DatabaseSecrets,
    #[serde(default)]
    pub encryption: EncryptionSecrets,
}

/// Loader for secrets from the secrets.toml file
pub struct SecretsLoader {
    secrets: SecretsFile,
}

impl SecretsLoader {
    /// Load secrets from the specified file path.
    /// Returns an empty loader if the file doesn't exist.
    pub fn load(secrets_path: &Path) -> Result<Self> {
        if !secrets_path.exists() {
            debug!("No secrets file at {:?}", secrets_path);
            return Ok(Self {
                secrets: SecretsFile::default(),
            });
        }

        let content = std::fs::read_to_string(secrets_path)
            .with_context(|| format!("Failed to read secrets file: {:?}", secrets_path))?;

        let secrets: SecretsFile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse secrets file: {:?}", secrets_path))?;

        info!("Loaded secrets from {:?}", secrets_path);

        Ok(Self { secrets })
    }

    pub fn database_password(&self) -> Option<&Secret> {
        self.secrets.database.password.as_ref()
    }

    pub fn encryption_key(&self) -> Option<&Secret> {
        self.secrets.encryption.key.as_ref()
    }
}
