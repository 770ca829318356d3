//! In-memory stand-in for PostgreSQL
//!
//! Databases are named sets of tables. `dump` writes a self-describing file
//! (JSON header, incompressible payload, end marker) and `restore` refuses
//! anything truncated, so corrupted artifacts fail the way a real
//! pg_restore would.

use async_trait::async_trait;
use backup_manager::engine::DatabaseEngine;
use backup_manager::errors::EngineError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

const END_MARKER: &[u8] = b"\nEND\n";
const PAYLOAD_BLOCKS: usize = 128;

/// Injectable failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Failure {
    /// `dump` exits non-zero
    Dump,
    /// Every rename fails (the swap breaks after production was dropped)
    Rename,
    /// A renamed database arrives with no tables (post-swap check fails)
    EmptyAfterRename,
    /// Restoring into a scratch database fails
    RestoreIntoScratch,
    /// A client reconnects right after sessions are terminated, so a plain
    /// drop of a non-scratch database fails
    ClientReconnects,
}

#[derive(Serialize, Deserialize)]
struct DumpHeader {
    database: String,
    tables: Vec<String>,
}

/// Runs after `dump` has written its output, with the output path
type DumpObserver = Box<dyn Fn(&Path) + Send + Sync>;

#[derive(Default)]
pub struct FakeEngine {
    databases: Mutex<HashMap<String, Vec<String>>>,
    failures: Mutex<HashSet<Failure>>,
    calls: Mutex<Vec<String>>,
    on_dump: Mutex<Option<DumpObserver>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine holding one database with `tables` tables
    pub fn with_database(name: &str, tables: usize) -> Self {
        let engine = Self::new();
        engine.seed(name, tables);
        engine
    }

    pub fn seed(&self, name: &str, tables: usize) {
        let tables = (0..tables).map(|i| format!("{}_t{}", name, i)).collect();
        self.databases.lock().unwrap().insert(name.to_string(), tables);
    }

    pub fn fail(&self, failure: Failure) {
        self.failures.lock().unwrap().insert(failure);
    }

    pub fn heal(&self, failure: Failure) {
        self.failures.lock().unwrap().remove(&failure);
    }

    /// Inspect the filesystem while the dump output exists but before the
    /// pipeline has sealed it
    pub fn on_dump<F>(&self, observer: F)
    where
        F: Fn(&Path) + Send + Sync + 'static,
    {
        *self.on_dump.lock().unwrap() = Some(Box::new(observer));
    }

    pub fn tables(&self, name: &str) -> Option<Vec<String>> {
        self.databases.lock().unwrap().get(name).cloned()
    }

    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.calls().iter().any(|call| call.starts_with(prefix))
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn failing(&self, failure: Failure) -> bool {
        self.failures.lock().unwrap().contains(&failure)
    }

    fn command_failed(program: &str, stderr: impl Into<String>) -> EngineError {
        EngineError::CommandFailed {
            program: program.to_string(),
            code: 1,
            stderr: stderr.into(),
        }
    }
}

/// Deterministic, incompressible filler so sealed dumps stay above the size floor
fn payload(seed: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(PAYLOAD_BLOCKS * 32);
    let mut block = Sha256::digest(seed.as_bytes()).to_vec();
    for _ in 0..PAYLOAD_BLOCKS {
        out.extend_from_slice(&block);
        block = Sha256::digest(&block).to_vec();
    }
    out
}

/// The bytes `FakeEngine::dump` writes for a database with these tables
pub fn dump_bytes(database: &str, tables: &[String]) -> Vec<u8> {
    let header = DumpHeader {
        database: database.to_string(),
        tables: tables.to_vec(),
    };
    let mut out = serde_json::to_vec(&header).unwrap();
    out.push(b'\n');
    out.extend(payload(database));
    out.extend_from_slice(END_MARKER);
    out
}

fn parse_dump(bytes: &[u8]) -> Result<DumpHeader, String> {
    if !bytes.ends_with(END_MARKER) {
        return Err("unexpected end of archive".to_string());
    }
    let newline = bytes
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| "missing header".to_string())?;
    serde_json::from_slice(&bytes[..newline]).map_err(|e| format!("bad header: {}", e))
}

#[async_trait]
impl DatabaseEngine for FakeEngine {
    fn required_tools(&self) -> Vec<String> {
        Vec::new()
    }

    async fn dump(&self, database: &str, output: &Path, _jobs: u32) -> Result<(), EngineError> {
        self.record(format!("dump {}", database));
        if self.failing(Failure::Dump) {
            // A failing dump still leaves partial output behind
            std::fs::write(output, b"partial")?;
            return Err(Self::command_failed("pg_dump", "connection lost"));
        }
        let tables = self
            .tables(database)
            .ok_or_else(|| EngineError::UnknownDatabase {
                name: database.to_string(),
            })?;
        std::fs::write(output, dump_bytes(database, &tables))?;
        if let Some(observer) = self.on_dump.lock().unwrap().as_ref() {
            observer(output);
        }
        Ok(())
    }

    async fn restore(&self, database: &str, input: &Path, _jobs: u32) -> Result<(), EngineError> {
        self.record(format!("restore {}", database));
        if self.failing(Failure::RestoreIntoScratch) && database.contains("_restore_") {
            return Err(Self::command_failed("pg_restore", "out of disk"));
        }
        let bytes = std::fs::read(input)?;
        let header = parse_dump(&bytes).map_err(|e| Self::command_failed("pg_restore", e))?;

        let mut databases = self.databases.lock().unwrap();
        let target = databases
            .get_mut(database)
            .ok_or_else(|| EngineError::UnknownDatabase {
                name: database.to_string(),
            })?;
        *target = header.tables;
        Ok(())
    }

    async fn database_exists(&self, database: &str) -> Result<bool, EngineError> {
        Ok(self.databases.lock().unwrap().contains_key(database))
    }

    async fn create_database(&self, database: &str) -> Result<(), EngineError> {
        self.record(format!("create {}", database));
        let mut databases = self.databases.lock().unwrap();
        if databases.contains_key(database) {
            return Err(EngineError::Sql {
                operation: "CREATE DATABASE".to_string(),
                reason: format!("database \"{}\" already exists", database),
            });
        }
        databases.insert(database.to_string(), Vec::new());
        Ok(())
    }

    async fn drop_database(&self, database: &str) -> Result<(), EngineError> {
        self.record(format!("drop {}", database));
        if self.failing(Failure::ClientReconnects)
            && !database.contains("_restore_")
            && self.databases.lock().unwrap().contains_key(database)
        {
            return Err(EngineError::Sql {
                operation: "DROP DATABASE".to_string(),
                reason: format!("database \"{}\" is being accessed by other users", database),
            });
        }
        self.databases.lock().unwrap().remove(database);
        Ok(())
    }

    async fn force_drop_database(&self, database: &str) -> Result<(), EngineError> {
        self.record(format!("force_drop {}", database));
        self.databases.lock().unwrap().remove(database);
        Ok(())
    }

    async fn rename_database(&self, from: &str, to: &str) -> Result<(), EngineError> {
        self.record(format!("rename {} {}", from, to));
        if self.failing(Failure::Rename) {
            return Err(EngineError::Sql {
                operation: "ALTER DATABASE RENAME".to_string(),
                reason: "lock timeout".to_string(),
            });
        }
        let empty = self.failing(Failure::EmptyAfterRename);
        let mut databases = self.databases.lock().unwrap();
        if databases.contains_key(to) {
            return Err(EngineError::Sql {
                operation: "ALTER DATABASE RENAME".to_string(),
                reason: format!("database \"{}\" already exists", to),
            });
        }
        let tables = databases
            .remove(from)
            .ok_or_else(|| EngineError::UnknownDatabase {
                name: from.to_string(),
            })?;
        databases.insert(to.to_string(), if empty { Vec::new() } else { tables });
        Ok(())
    }

    async fn terminate_connections(&self, database: &str) -> Result<u64, EngineError> {
        self.record(format!("terminate {}", database));
        Ok(0)
    }

    async fn count_user_tables(&self, database: &str) -> Result<i64, EngineError> {
        self.tables(database)
            .map(|tables| tables.len() as i64)
            .ok_or_else(|| EngineError::UnknownDatabase {
                name: database.to_string(),
            })
    }
}
