// File: manager/src/pipeline/dump.rs
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument};

use super::PartialOutput;
use crate::engine::DatabaseEngine;
use crate::errors::DumpError;

/// Produces one consistent snapshot of a live database.
///
/// Consistency comes from the dump primitive's own transactional snapshot;
/// writers are never locked out.
#[derive(Clone)]
pub struct DumpEngine {
    engine: Arc<dyn DatabaseEngine>,
    jobs: u32,
}

impl DumpEngine {
    pub fn new(engine: Arc<dyn DatabaseEngine>, jobs: u32) -> Self {
        Self {
            engine,
            jobs: jobs.max(1),
        }
    }

    /// Dump `database` into `output`. Partial output is removed on any failure.
    #[instrument(skip(self), fields(jobs = self.jobs))]
    pub async fn create_dump(&self, database: &str, output: &Path) -> Result<PathBuf, DumpError> {
        let started = std::time::Instant::now();
        let guard = PartialOutput::new(output.to_path_buf());

        self.engine.dump(database, output, self.jobs).await?;

        let metadata = match tokio::fs::metadata(output).await {
            Ok(metadata) => metadata,
            Err(_) => {
                return Err(DumpError::MissingOutput {
                    path: output.to_path_buf(),
                })
            }
        };
        if metadata.len() == 0 {
            return Err(DumpError::EmptyOutput {
                path: output.to_path_buf(),
            });
        }

        info!(
            "✓ Dumped '{}' to {} ({} bytes, {:.1}s)",
            database,
            output.display(),
            metadata.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(guard.disarm())
    }
}
