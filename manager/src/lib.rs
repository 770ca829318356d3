pub mod artifact;
pub mod commands;
pub mod config;
pub mod constants;
pub mod context;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod outcome;
pub mod pipeline;
pub mod restore;
pub mod retention;
pub mod run_lock;
pub mod services;
pub mod verify;

// Re-export commonly used types
pub use artifact::{ArtifactCatalog, BackupArtifact, Tier};
pub use config::{Config, ConfigManager};
pub use context::ManagerContext;
pub use engine::{DatabaseEngine, PostgresEngine};
pub use errors::ManagerError;
pub use outcome::RunOutcome;
pub use restore::{RestoreEngine, RestoreOptions, RestoreReport};
pub use retention::RetentionManager;
pub use services::{BackupService, NotificationDispatcher};
pub use verify::IntegrityVerifier;
