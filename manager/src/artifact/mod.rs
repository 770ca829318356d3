// File: manager/src/artifact/mod.rs
pub mod catalog;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::constants::{integrity, layout};

pub use catalog::{ArtifactCatalog, CatalogEntry};

/// Calendar retention class of a scheduled artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Daily,
    Weekly,
    Monthly,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Daily, Tier::Weekly, Tier::Monthly];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Tier::Daily => "daily",
            Tier::Weekly => "weekly",
            Tier::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(Tier::Daily),
            "weekly" => Ok(Tier::Weekly),
            "monthly" => Ok(Tier::Monthly),
            other => Err(format!("unknown tier '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Scheduled,
    PreRestore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Unverified,
    Passed,
    Failed,
    Warning,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            VerificationStatus::Unverified => "UNVERIFIED",
            VerificationStatus::Passed => "PASSED",
            VerificationStatus::Failed => "FAILED",
            VerificationStatus::Warning => "WARNING",
        };
        f.write_str(label)
    }
}

/// A stored snapshot file.
///
/// The tier is fixed when the artifact is created and is derived from the
/// directory it was stored into, never from the date in its name. Only the
/// integrity verifier updates `checksum` and `verified`.
#[derive(Debug, Clone, Serialize)]
pub struct BackupArtifact {
    id: String,
    kind: ArtifactKind,
    tier: Tier,
    path: PathBuf,
    size_bytes: u64,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
    compressed: bool,
    encrypted: bool,
    checksum: Option<String>,
    verified: VerificationStatus,
}

impl BackupArtifact {
    /// Describe an existing file. Pre-restore snapshots carry the daily tier,
    /// whose window also governs their pruning.
    pub fn from_path(path: &Path, kind: ArtifactKind, tier: Tier) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let modified_at: DateTime<Utc> = metadata.modified()?.into();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        let (compressed, encrypted) = sealed_flags(&file_name);
        let (id, created_at) = match parse_timestamp(&file_name) {
            Some(parsed) => parsed,
            None => (stem_of(&file_name).to_string(), modified_at),
        };
        let tier = match kind {
            ArtifactKind::Scheduled => tier,
            ArtifactKind::PreRestore => Tier::Daily,
        };

        Ok(Self {
            id,
            kind,
            tier,
            path: path.to_path_buf(),
            size_bytes: metadata.len(),
            created_at,
            modified_at,
            compressed,
            encrypted,
            checksum: None,
            verified: VerificationStatus::Unverified,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    pub fn verified(&self) -> VerificationStatus {
        self.verified
    }

    pub(crate) fn set_checksum(&mut self, checksum: String) {
        self.checksum = Some(checksum);
    }

    pub(crate) fn set_verified(&mut self, status: VerificationStatus) {
        self.verified = status;
    }

    /// Sibling `<artifact>.sha256` file
    pub fn checksum_path(&self) -> PathBuf {
        checksum_path_for(&self.path)
    }

    /// Age measured from the filesystem modification time
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.modified_at)
    }

    pub fn is_below_size_floor(&self) -> bool {
        self.size_bytes < integrity::MIN_ARTIFACT_BYTES
    }
}

pub fn checksum_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(layout::CHECKSUM_SUFFIX);
    PathBuf::from(name)
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(layout::TIMESTAMP_FORMAT).to_string()
}

/// `<prefix>_<YYYYMMDD_HHMMSS>.dump`
pub fn artifact_file_name(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{}_{}{}", prefix, format_timestamp(at), layout::DUMP_SUFFIX)
}

/// `pre_restore_<database>_<YYYYMMDD_HHMMSS>.dump`
pub fn pre_restore_file_name(database: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}_{}_{}{}",
        layout::PRE_RESTORE_PREFIX,
        database,
        format_timestamp(at),
        layout::DUMP_SUFFIX
    )
}

/// True for `.dump`, `.dump.gz`, `.dump.gpg` and `.dump.gz.gpg` files
pub fn is_artifact_file(file_name: &str) -> bool {
    let base = file_name
        .strip_suffix(layout::GPG_SUFFIX)
        .unwrap_or(file_name);
    let base = base.strip_suffix(layout::GZIP_SUFFIX).unwrap_or(base);
    base.ends_with(layout::DUMP_SUFFIX) && base.len() > layout::DUMP_SUFFIX.len()
}

/// (compressed, encrypted) from the file extensions
pub fn sealed_flags(file_name: &str) -> (bool, bool) {
    let encrypted = file_name.ends_with(layout::GPG_SUFFIX);
    let base = file_name
        .strip_suffix(layout::GPG_SUFFIX)
        .unwrap_or(file_name);
    (base.ends_with(layout::GZIP_SUFFIX), encrypted)
}

/// Name without `.dump[.gz][.gpg]`
fn stem_of(file_name: &str) -> &str {
    let base = file_name
        .strip_suffix(layout::GPG_SUFFIX)
        .unwrap_or(file_name);
    let base = base.strip_suffix(layout::GZIP_SUFFIX).unwrap_or(base);
    base.strip_suffix(layout::DUMP_SUFFIX).unwrap_or(base)
}

/// Extract the trailing `YYYYMMDD_HHMMSS` id from an artifact name
pub fn parse_timestamp(file_name: &str) -> Option<(String, DateTime<Utc>)> {
    let stem = stem_of(file_name);
    if stem.len() <= layout::TIMESTAMP_LEN {
        return None;
    }
    let split = stem.len() - layout::TIMESTAMP_LEN;
    if !stem.is_char_boundary(split) || !stem[..split].ends_with('_') {
        return None;
    }
    let id = &stem[split..];
    let naive = NaiveDateTime::parse_from_str(id, layout::TIMESTAMP_FORMAT).ok()?;
    Some((id.to_string(), Utc.from_utc_datetime(&naive)))
}
