// File: manager/src/artifact/catalog.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{is_artifact_file, ArtifactKind, BackupArtifact, Tier};
use crate::config::Config;
use crate::constants::layout;
use crate::errors::IntegrityError;

/// Row of the `list` output
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub id: String,
    pub kind: ArtifactKind,
    pub tier: Tier,
    pub file_name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub age_hours: i64,
    pub compressed: bool,
    pub encrypted: bool,
    pub has_checksum: bool,
    /// False when the artifact is below the size floor and can never be restored
    pub usable: bool,
}

/// Read-only view over the artifacts stored under the backup root
pub struct ArtifactCatalog {
    config: Arc<Config>,
}

impl ArtifactCatalog {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Scheduled artifacts of one tier, newest first
    pub fn list_tier(&self, tier: Tier) -> Result<Vec<BackupArtifact>, IntegrityError> {
        scan_dir(&self.config.tier_dir(tier), ArtifactKind::Scheduled, tier)
    }

    /// Pre-restore snapshots, newest first
    pub fn list_pre_restore(&self) -> Result<Vec<BackupArtifact>, IntegrityError> {
        scan_dir(
            &self.config.pre_restore_dir(),
            ArtifactKind::PreRestore,
            Tier::Daily,
        )
    }

    /// Scheduled artifacts across every tier, newest first
    pub fn list_scheduled(&self) -> Result<Vec<BackupArtifact>, IntegrityError> {
        let mut all = Vec::new();
        for tier in Tier::ALL {
            all.extend(self.list_tier(tier)?);
        }
        sort_newest_first(&mut all);
        Ok(all)
    }

    /// Every artifact including pre-restore snapshots, newest first
    pub fn list(&self) -> Result<Vec<BackupArtifact>, IntegrityError> {
        let mut all = self.list_scheduled()?;
        all.extend(self.list_pre_restore()?);
        sort_newest_first(&mut all);
        Ok(all)
    }

    /// The newest scheduled artifact of each tier that has one
    pub fn latest_per_tier(&self) -> Result<Vec<BackupArtifact>, IntegrityError> {
        let mut latest = Vec::new();
        for tier in Tier::ALL {
            if let Some(newest) = self.list_tier(tier)?.into_iter().next() {
                latest.push(newest);
            }
        }
        Ok(latest)
    }

    pub fn entries(&self, now: DateTime<Utc>) -> Result<Vec<CatalogEntry>, IntegrityError> {
        Ok(self
            .list()?
            .into_iter()
            .map(|artifact| CatalogEntry {
                id: artifact.id().to_string(),
                kind: artifact.kind(),
                tier: artifact.tier(),
                file_name: artifact.file_name(),
                path: artifact.path().to_path_buf(),
                size_bytes: artifact.size_bytes(),
                created_at: artifact.created_at(),
                age_hours: artifact.age(now).num_hours(),
                compressed: artifact.is_compressed(),
                encrypted: artifact.is_encrypted(),
                has_checksum: artifact.checksum_path().exists(),
                usable: !artifact.is_below_size_floor(),
            })
            .collect())
    }

    /// Resolve an artifact reference: an existing file path, an exact
    /// `YYYYMMDD_HHMMSS` id, or a prefix of one. A prefix selects the newest
    /// matching artifact; it is ambiguous only when that newest id is stored
    /// more than once.
    pub fn resolve(&self, reference: &str) -> Result<BackupArtifact, IntegrityError> {
        let as_path = Path::new(reference);
        if as_path.is_file() {
            let (kind, tier) = self.locate(as_path);
            debug!("Resolved {} as a path ({:?}, {})", reference, kind, tier);
            return Ok(BackupArtifact::from_path(as_path, kind, tier)?);
        }

        let all = self.list()?;

        let exact: Vec<&BackupArtifact> = all.iter().filter(|a| a.id() == reference).collect();
        let candidates: Vec<&BackupArtifact> = if exact.is_empty() {
            all.iter()
                .filter(|a| !reference.is_empty() && a.id().starts_with(reference))
                .collect()
        } else {
            exact
        };

        let newest = match candidates.first() {
            Some(newest) => *newest,
            None => {
                return Err(IntegrityError::NotFound {
                    reference: reference.to_string(),
                })
            }
        };

        let tied: Vec<&BackupArtifact> = candidates
            .iter()
            .copied()
            .filter(|a| a.id() == newest.id())
            .collect();
        if tied.len() > 1 {
            return Err(IntegrityError::Ambiguous {
                reference: reference.to_string(),
                candidates: tied
                    .iter()
                    .map(|a| a.path().display().to_string())
                    .collect(),
            });
        }

        Ok(newest.clone())
    }

    /// Kind and tier of a file from the directory it lives in
    fn locate(&self, path: &Path) -> (ArtifactKind, Tier) {
        let parent = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        if parent == layout::PRE_RESTORE_DIR {
            return (ArtifactKind::PreRestore, Tier::Daily);
        }
        match parent.parse::<Tier>() {
            Ok(tier) => (ArtifactKind::Scheduled, tier),
            Err(_) => (ArtifactKind::Scheduled, Tier::Daily),
        }
    }
}

fn sort_newest_first(artifacts: &mut [BackupArtifact]) {
    artifacts.sort_by(|a, b| {
        b.created_at()
            .cmp(&a.created_at())
            .then_with(|| b.id().cmp(a.id()))
    });
}

fn scan_dir(
    dir: &Path,
    kind: ArtifactKind,
    tier: Tier,
) -> Result<Vec<BackupArtifact>, IntegrityError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let pattern = format!(
        "{}/*{}*",
        glob::Pattern::escape(&dir.to_string_lossy()),
        layout::DUMP_SUFFIX
    );
    let paths = glob::glob(&pattern).map_err(|e| {
        IntegrityError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            e.to_string(),
        ))
    })?;

    let mut artifacts = Vec::new();
    for entry in paths {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!("Skipping unreadable catalog entry: {}", e);
                continue;
            }
        };
        let is_candidate = path
            .file_name()
            .map(|name| is_artifact_file(&name.to_string_lossy()))
            .unwrap_or(false);
        if !is_candidate || !path.is_file() {
            continue;
        }
        match BackupArtifact::from_path(&path, kind, tier) {
            Ok(artifact) => artifacts.push(artifact),
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }

    sort_newest_first(&mut artifacts);
    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn catalog_in(dir: &Path) -> ArtifactCatalog {
        let mut config = Config::default();
        config.database.name = "shop".to_string();
        config.storage.backup_dir = dir.to_path_buf();
        for d in config.layout_dirs() {
            std::fs::create_dir_all(d).unwrap();
        }
        ArtifactCatalog::new(Arc::new(config))
    }

    fn touch(path: PathBuf) {
        std::fs::write(path, vec![1u8; 2048]).unwrap();
    }

    #[test]
    fn test_list_skips_checksums_and_partials() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog_in(dir.path());
        touch(dir.path().join("daily/db_backup_20240305_010000.dump.gz"));
        touch(dir.path().join("daily/db_backup_20240305_010000.dump.gz.sha256"));
        touch(dir.path().join("daily/db_backup_20240306_010000.dump.gz.partial"));
        touch(dir.path().join("monthly/db_backup_20240301_010000.dump.gz"));

        let all = catalog.list().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id(), "20240305_010000");
        assert_eq!(all[1].tier(), Tier::Monthly);
    }

    #[test]
    fn test_resolve_prefix_picks_newest() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog_in(dir.path());
        touch(dir.path().join("daily/db_backup_20240305_010000.dump.gz"));
        touch(dir.path().join("daily/db_backup_20240305_130000.dump.gz"));

        assert_eq!(catalog.resolve("20240305").unwrap().id(), "20240305_130000");
        assert_eq!(
            catalog.resolve("20240305_010000").unwrap().id(),
            "20240305_010000"
        );
        assert!(matches!(
            catalog.resolve("2023"),
            Err(IntegrityError::NotFound { .. })
        ));
    }

    #[test]
    fn test_resolve_duplicate_id_is_ambiguous() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog_in(dir.path());
        touch(dir.path().join("daily/db_backup_20240305_010000.dump.gz"));
        touch(dir.path().join("pre_restore/pre_restore_shop_20240305_010000.dump.gz"));

        assert!(matches!(
            catalog.resolve("20240305_010000"),
            Err(IntegrityError::Ambiguous { .. })
        ));
    }

    #[test]
    fn test_resolve_path_uses_directory_tier() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog_in(dir.path());
        let path = dir.path().join("weekly/db_backup_20240310_010000.dump.gz");
        touch(path.clone());

        let artifact = catalog.resolve(&path.to_string_lossy()).unwrap();
        assert_eq!(artifact.tier(), Tier::Weekly);
        assert_eq!(artifact.kind(), ArtifactKind::Scheduled);
    }
}
