// File: manager/src/engine/mod.rs
//! Database primitives the backup and restore pipelines are built on.
//!
//! Pipelines never talk to a database directly; they go through
//! [`DatabaseEngine`]. Destructive DDL against the production database is
//! only issued through [`crate::restore::ProductionDatabase`], which can only
//! be obtained from a held run lease.

pub mod postgres;

use async_trait::async_trait;
use std::path::Path;

use crate::errors::EngineError;

pub use postgres::PostgresEngine;

/// Longest identifier PostgreSQL keeps without truncation
const MAX_IDENTIFIER_LEN: usize = 63;
const SUFFIX_LEN: usize = 8;

#[async_trait]
pub trait DatabaseEngine: Send + Sync {
    /// External binaries that must be on PATH
    fn required_tools(&self) -> Vec<String>;

    /// Write one consistent snapshot of `database` to the file `output`
    async fn dump(&self, database: &str, output: &Path, jobs: u32) -> Result<(), EngineError>;

    /// Load a snapshot file produced by `dump` into an existing, empty `database`
    async fn restore(&self, database: &str, input: &Path, jobs: u32) -> Result<(), EngineError>;

    async fn database_exists(&self, database: &str) -> Result<bool, EngineError>;

    async fn create_database(&self, database: &str) -> Result<(), EngineError>;

    /// Drop if present
    async fn drop_database(&self, database: &str) -> Result<(), EngineError>;

    /// Drop if present, even while other clients hold sessions on it
    async fn force_drop_database(&self, database: &str) -> Result<(), EngineError> {
        self.terminate_connections(database).await?;
        self.drop_database(database).await
    }

    async fn rename_database(&self, from: &str, to: &str) -> Result<(), EngineError>;

    /// Forcibly end other sessions on `database`; returns how many were ended
    async fn terminate_connections(&self, database: &str) -> Result<u64, EngineError>;

    async fn count_user_tables(&self, database: &str) -> Result<i64, EngineError>;
}

/// Accept only identifiers that are safe to double-quote into DDL
pub fn validate_identifier(name: &str) -> Result<(), EngineError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_IDENTIFIER_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        && !name.starts_with('-');
    if valid {
        Ok(())
    } else {
        Err(EngineError::InvalidIdentifier {
            name: name.to_string(),
        })
    }
}

pub fn quote_identifier(name: &str) -> Result<String, EngineError> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name))
}

fn short_suffix() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(SUFFIX_LEN);
    id
}

/// `<target>_restore_<8 hex>`, shortened to fit the identifier limit
pub fn scratch_database_name(target: &str) -> String {
    let suffix = format!("_restore_{}", short_suffix());
    let keep = MAX_IDENTIFIER_LEN.saturating_sub(suffix.len()).min(target.len());
    format!("{}{}", &target[..keep], suffix)
}

/// `verify_<8 hex>`, used by test-restores
pub fn throwaway_database_name() -> String {
    format!("verify_{}", short_suffix())
}
