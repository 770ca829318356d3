//! Run exclusivity and artifact pinning
//!
//! A backup and a restore against the same database must never overlap.
//! Exclusivity is an advisory file lock on `.locks/<database>.lock`, held for
//! the life of the run and released on drop, so a crashed process never
//! leaves a stale lock behind. The lock file carries the lease (operation,
//! pid, host, start time) so a refused run can name the holder.
//!
//! Pins are marker files in `.pins/` that keep an artifact out of retention
//! pruning while a restore session is using it. Each session holds its own
//! locked pin, so overlapping sessions on one artifact do not release each
//! other's protection.
//!
//! # Usage
//!
//! ```ignore
//! let lease = RunLock::acquire(&config.locks_dir(), "shop", "restore")?;
//! let production = lease.production(engine.clone());
//! // ... destructive work through `production` ...
//! drop(lease); // lock released
//! ```

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::engine::DatabaseEngine;
use crate::errors::LockError;
use crate::restore::ProductionDatabase;

const LOCK_SUFFIX: &str = ".lock";
const PIN_SUFFIX: &str = ".pin";
const PIN_PENDING_SUFFIX: &str = ".pin-pending";

/// Record written into a held lock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub operation: String,
    pub database: String,
    pub pid: u32,
    pub host: String,
    pub started_at: DateTime<Utc>,
}

impl Lease {
    fn describe(&self) -> String {
        let running = Utc::now().signed_duration_since(self.started_at);
        let running = if running.num_hours() > 0 {
            format!("{}h {}m", running.num_hours(), running.num_minutes() % 60)
        } else {
            format!("{}m", running.num_minutes())
        };
        format!(
            "'{}' by pid {} on {} (started {} ago)",
            self.operation, self.pid, self.host, running
        )
    }
}

pub struct RunLock;

impl RunLock {
    /// Take the exclusive lock for `database` without blocking
    #[instrument(skip(locks_dir))]
    pub fn acquire(locks_dir: &Path, database: &str, operation: &str) -> Result<RunLease, LockError> {
        let io_error = |path: &Path, e: std::io::Error| LockError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        fs::create_dir_all(locks_dir).map_err(|e| io_error(locks_dir, e))?;
        let path = locks_dir.join(format!("{}{}", database, LOCK_SUFFIX));

        // No truncate on open: the current holder's lease must stay readable
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| io_error(&path, e))?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() == fs2::lock_contended_error().kind() {
                let mut content = String::new();
                let _ = file.read_to_string(&mut content);
                let holder = serde_json::from_str::<Lease>(&content)
                    .map(|lease| lease.describe())
                    .unwrap_or_else(|_| "another process".to_string());
                warn!("Database '{}' is busy: {}", database, holder);
                return Err(LockError::Busy {
                    database: database.to_string(),
                    holder,
                });
            }
            return Err(io_error(&path, e));
        }

        let lease = Lease {
            operation: operation.to_string(),
            database: database.to_string(),
            pid: std::process::id(),
            host: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            started_at: Utc::now(),
        };
        let body = serde_json::to_vec_pretty(&lease).map_err(|e| LockError::Io {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        file.set_len(0)
            .and_then(|_| file.seek(SeekFrom::Start(0)))
            .and_then(|_| file.write_all(&body))
            .and_then(|_| file.sync_all())
            .map_err(|e| io_error(&path, e))?;

        info!("Acquired run lock for '{}' ({})", database, operation);
        Ok(RunLease { file, path, lease })
    }
}

/// A held run lock. Dropping it releases the lock.
pub struct RunLease {
    file: File,
    path: PathBuf,
    lease: Lease,
}

impl RunLease {
    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    pub fn database(&self) -> &str {
        &self.lease.database
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The only way to obtain a handle that may issue destructive DDL
    /// against the production database. It cannot outlive the lease.
    pub fn production(&self, engine: Arc<dyn DatabaseEngine>) -> ProductionDatabase<'_> {
        ProductionDatabase::new(self.lease.database.clone(), engine)
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release run lock {}: {}", self.path.display(), e);
        } else {
            debug!(
                "Released run lock for '{}' ({})",
                self.lease.database, self.lease.operation
            );
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PinRecord {
    artifact: PathBuf,
    pid: u32,
    pinned_at: DateTime<Utc>,
}

/// Marker files protecting artifacts from pruning.
///
/// Every session gets its own `<artifact>.<id>.pin`, exclusively locked for
/// as long as the guard lives. A pin counts while its lock is held, however
/// old it is; an unlocked pin file belongs to a process that died and is
/// removed on sight.
#[derive(Debug, Clone)]
pub struct PinRegistry {
    dir: PathBuf,
}

impl PinRegistry {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Pin `artifact` until the returned guard drops
    pub fn pin(&self, artifact: &Path) -> std::io::Result<ArtifactPin> {
        fs::create_dir_all(&self.dir)?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        let name = format!("{}.{}", artifact_name(artifact), id);
        // Locked under a name no reader matches, then renamed into place, so
        // a concurrent scan never sees an unlocked pin that is still live
        let pending = self.dir.join(format!("{}{}", name, PIN_PENDING_SUFFIX));
        let path = self.dir.join(format!("{}{}", name, PIN_SUFFIX));

        let record = PinRecord {
            artifact: artifact.to_path_buf(),
            pid: std::process::id(),
            pinned_at: Utc::now(),
        };
        let body = serde_json::to_vec(&record).map_err(std::io::Error::other)?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&pending)?;
        if let Err(e) = file.try_lock_exclusive() {
            let _ = fs::remove_file(&pending);
            return Err(e);
        }
        let written = file
            .write_all(&body)
            .and_then(|_| file.sync_all())
            .and_then(|_| fs::rename(&pending, &path));
        if let Err(e) = written {
            let _ = fs::remove_file(&pending);
            return Err(e);
        }

        debug!("Pinned {} ({})", artifact.display(), id);
        Ok(ArtifactPin { file, path })
    }

    /// True while any session holds a pin on `artifact`
    pub fn is_pinned(&self, artifact: &Path) -> bool {
        let wanted = artifact_name(artifact);
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return false,
        };

        let mut pinned = false;
        for entry in entries.flatten() {
            let file_name = entry.file_name().to_string_lossy().to_string();
            let pinned_name = file_name
                .strip_suffix(PIN_SUFFIX)
                .and_then(|stem| stem.rsplit_once('.'))
                .map(|(name, _id)| name);
            if pinned_name != Some(wanted.as_str()) {
                continue;
            }
            if pin_is_live(&entry.path()) {
                pinned = true;
            }
        }
        pinned
    }
}

fn artifact_name(artifact: &Path) -> String {
    artifact
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// A pin is live while its owner holds the lock. Anything we cannot prove
/// abandoned counts as live.
fn pin_is_live(path: &Path) -> bool {
    let file = match File::open(path) {
        Ok(file) => file,
        // Released between listing and opening
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return false,
        Err(e) => {
            warn!("Cannot inspect pin {}: {}", path.display(), e);
            return true;
        }
    };

    match FileExt::try_lock_shared(&file) {
        Ok(()) => {
            let owner = fs::read_to_string(path)
                .ok()
                .and_then(|content| serde_json::from_str::<PinRecord>(&content).ok())
                .map(|record| format!("pid {} since {}", record.pid, record.pinned_at))
                .unwrap_or_else(|| "unknown owner".to_string());
            let _ = FileExt::unlock(&file);
            warn!("Removing abandoned pin {} ({})", path.display(), owner);
            if let Err(e) = fs::remove_file(path) {
                warn!("Failed to remove abandoned pin {}: {}", path.display(), e);
            }
            false
        }
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => true,
        Err(e) => {
            warn!("Cannot lock pin {}: {}", path.display(), e);
            true
        }
    }
}

/// Holds a pin's lock and removes its file on drop
pub struct ArtifactPin {
    file: File,
    path: PathBuf,
}

impl ArtifactPin {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ArtifactPin {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove pin {}: {}", self.path.display(), e);
        }
        let _ = FileExt::unlock(&self.file);
    }
}
