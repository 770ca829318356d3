// File: manager/src/context.rs
use std::sync::Arc;
use tracing::info;

use crate::config::{validate_environment, Config, EnvironmentReport};
use crate::engine::{DatabaseEngine, PostgresEngine};
use crate::errors::ManagerError;
use crate::pipeline::Encryptor;
use crate::restore::{Confirmer, RestoreEngine};
use crate::services::{BackupService, NotificationDispatcher, RemoteStorage};
use crate::verify::IntegrityVerifier;

/// Everything a run needs once configuration and the environment check
/// have passed. Building one is the pre-flight step: any error here means
/// nothing was touched.
pub struct ManagerContext {
    pub config: Arc<Config>,
    pub engine: Arc<dyn DatabaseEngine>,
    pub environment: EnvironmentReport,
    pub encryptor: Encryptor,
    pub remote: Option<RemoteStorage>,
    pub notifier: NotificationDispatcher,
}

impl ManagerContext {
    /// Pre-flight against the PostgreSQL engine
    pub fn prepare(config: Arc<Config>) -> Result<Self, ManagerError> {
        let engine: Arc<dyn DatabaseEngine> = Arc::new(PostgresEngine::new(
            config.database.clone(),
            config.tools.clone(),
        ));
        Self::with_engine(config, engine)
    }

    pub fn with_engine(config: Arc<Config>, engine: Arc<dyn DatabaseEngine>) -> Result<Self, ManagerError> {
        let environment = validate_environment(&config, &engine.required_tools())?;
        let encryptor = Encryptor::from_config(
            &config.encryption,
            environment.encryption_enabled,
            config.staging_dir(),
        );
        let remote = RemoteStorage::from_config(&config.remote, environment.remote_enabled);
        let notifier = NotificationDispatcher::new(&config.notifications);

        info!(
            "Ready: database '{}', encryption {}, offsite copies {}",
            config.database.name,
            if encryptor.is_enabled() { "on" } else { "off" },
            if remote.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            config,
            engine,
            environment,
            encryptor,
            remote,
            notifier,
        })
    }

    pub fn backup_service(&self) -> BackupService {
        BackupService::new(
            self.config.clone(),
            self.engine.clone(),
            self.encryptor.clone(),
            self.remote.clone(),
        )
    }

    pub fn restore_engine(&self, confirmer: Arc<dyn Confirmer>) -> RestoreEngine {
        RestoreEngine::new(
            self.config.clone(),
            self.engine.clone(),
            self.encryptor.clone(),
            confirmer,
        )
    }

    pub fn verifier(&self) -> IntegrityVerifier {
        IntegrityVerifier::new(self.config.clone(), self.engine.clone(), self.encryptor.clone())
    }
}
