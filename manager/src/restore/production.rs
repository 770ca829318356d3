// File: manager/src/restore/production.rs
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::engine::DatabaseEngine;
use crate::errors::EngineError;

/// The live production database.
///
/// Obtained only through [`crate::run_lock::RunLease::production`], so every
/// destructive statement against production happens under the run lock and
/// the handle cannot outlive it.
pub struct ProductionDatabase<'lease> {
    name: String,
    engine: Arc<dyn DatabaseEngine>,
    _lease: PhantomData<&'lease ()>,
}

impl<'lease> ProductionDatabase<'lease> {
    pub(crate) fn new(name: String, engine: Arc<dyn DatabaseEngine>) -> Self {
        Self {
            name,
            engine,
            _lease: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn exists(&self) -> Result<bool, EngineError> {
        self.engine.database_exists(&self.name).await
    }

    pub async fn count_user_tables(&self) -> Result<i64, EngineError> {
        self.engine.count_user_tables(&self.name).await
    }

    pub async fn terminate_connections(&self) -> Result<u64, EngineError> {
        let ended = self.engine.terminate_connections(&self.name).await?;
        if ended > 0 {
            warn!("Terminated {} sessions on '{}'", ended, self.name);
        }
        Ok(ended)
    }

    /// Drop production even if a client reconnected after the terminate
    pub async fn drop_database(&self) -> Result<(), EngineError> {
        self.engine.force_drop_database(&self.name).await?;
        warn!("Dropped production database '{}'", self.name);
        Ok(())
    }

    /// Rename `scratch` into the production name
    pub async fn adopt(&self, scratch: &str) -> Result<(), EngineError> {
        self.engine.rename_database(scratch, &self.name).await?;
        info!("✓ '{}' is now production '{}'", scratch, self.name);
        Ok(())
    }

    /// Replace production with the contents of a plain dump
    pub async fn recreate_from(&self, dump: &Path, jobs: u32) -> Result<(), EngineError> {
        self.terminate_connections().await?;
        self.engine.force_drop_database(&self.name).await?;
        self.engine.create_database(&self.name).await?;
        self.engine.restore(&self.name, dump, jobs).await
    }
}
