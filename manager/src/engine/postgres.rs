// File: manager/src/engine/postgres.rs
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{ConnectOptions, Connection, Executor};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{quote_identifier, DatabaseEngine};
use crate::commands::run_command;
use crate::config::{DatabaseConfig, ToolsConfig};
use crate::errors::EngineError;

const POOL_MAX_CONNECTIONS: u32 = 2;
/// First server version that accepts `DROP DATABASE ... WITH (FORCE)`
const FORCE_DROP_MIN_VERSION: i32 = 130_000;

/// `pg_dump` / `pg_restore` plus a SQL channel on the maintenance database.
///
/// Dumps use the directory format so they can run with several jobs; the
/// directory is packed into a single tar file so each artifact is one file.
pub struct PostgresEngine {
    database: DatabaseConfig,
    tools: ToolsConfig,
    pool: OnceCell<PgPool>,
}

impl PostgresEngine {
    pub fn new(database: DatabaseConfig, tools: ToolsConfig) -> Self {
        Self {
            database,
            tools,
            pool: OnceCell::new(),
        }
    }

    fn connect_options(&self, database: &str) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.database.host)
            .port(self.database.port)
            .username(&self.database.user)
            .database(database);
        if let Some(password) = &self.database.password {
            options = options.password(password.expose());
        }
        options.disable_statement_logging()
    }

    async fn pool(&self) -> Result<&PgPool, EngineError> {
        self.pool
            .get_or_try_init(|| async {
                debug!(
                    "Connecting to {}:{}/{}",
                    self.database.host, self.database.port, self.database.maintenance_database
                );
                PgPoolOptions::new()
                    .max_connections(POOL_MAX_CONNECTIONS)
                    .acquire_timeout(Duration::from_secs(self.database.connect_timeout_seconds))
                    .connect_with(self.connect_options(&self.database.maintenance_database))
                    .await
                    .map_err(|e| sql_error("connect", e))
            })
            .await
    }

    async fn execute_ddl(&self, operation: &str, statement: String) -> Result<(), EngineError> {
        debug!("DDL: {}", statement);
        let pool = self.pool().await?;
        pool.execute(statement.as_str())
            .await
            .map_err(|e| sql_error(operation, e))?;
        Ok(())
    }

    fn connection_args(&self) -> Vec<OsString> {
        vec![
            "--host".into(),
            self.database.host.clone().into(),
            "--port".into(),
            self.database.port.to_string().into(),
            "--username".into(),
            self.database.user.clone().into(),
            "--no-password".into(),
        ]
    }

    fn password_env(&self) -> Vec<(&str, &str)> {
        match &self.database.password {
            Some(password) => vec![("PGPASSWORD", password.expose())],
            None => Vec::new(),
        }
    }
}

fn drop_statement(database: &str, force: bool) -> Result<String, EngineError> {
    let mut statement = format!("DROP DATABASE IF EXISTS {}", quote_identifier(database)?);
    if force {
        statement.push_str(" WITH (FORCE)");
    }
    Ok(statement)
}

fn sql_error(operation: &str, err: sqlx::Error) -> EngineError {
    EngineError::Sql {
        operation: operation.to_string(),
        reason: err.to_string(),
    }
}

/// Scratch directory next to `path` so packing never crosses filesystems
fn sibling_workdir(path: &Path) -> Result<tempfile::TempDir, EngineError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(tempfile::Builder::new().prefix(".pgdir").tempdir_in(parent)?)
}

async fn pack_directory(source: PathBuf, output: PathBuf) -> Result<(), EngineError> {
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let file = std::fs::File::create(&output)?;
        let mut builder = tar::Builder::new(file);
        builder.append_dir_all(".", &source)?;
        let file = builder.into_inner()?;
        file.sync_all()
    })
    .await
    .map_err(|e| EngineError::Io(std::io::Error::other(e)))??;
    Ok(())
}

async fn unpack_archive(input: PathBuf, target: PathBuf) -> Result<(), EngineError> {
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let file = std::fs::File::open(&input)?;
        tar::Archive::new(file).unpack(&target)
    })
    .await
    .map_err(|e| EngineError::Io(std::io::Error::other(e)))??;
    Ok(())
}

#[async_trait]
impl DatabaseEngine for PostgresEngine {
    fn required_tools(&self) -> Vec<String> {
        vec![self.tools.pg_dump.clone(), self.tools.pg_restore.clone()]
    }

    async fn dump(&self, database: &str, output: &Path, jobs: u32) -> Result<(), EngineError> {
        let workdir = sibling_workdir(output)?;
        let dump_dir = workdir.path().join("dump");

        let mut args = self.connection_args();
        args.extend([
            OsString::from("--format=directory"),
            OsString::from("--jobs"),
            OsString::from(jobs.max(1).to_string()),
            OsString::from("--file"),
            dump_dir.clone().into_os_string(),
            OsString::from(database),
        ]);

        info!("Running {} for '{}' with {} jobs", self.tools.pg_dump, database, jobs);
        run_command(&self.tools.pg_dump, &args, &self.password_env()).await?;

        pack_directory(dump_dir, output.to_path_buf()).await
    }

    async fn restore(&self, database: &str, input: &Path, jobs: u32) -> Result<(), EngineError> {
        let workdir = sibling_workdir(input)?;
        unpack_archive(input.to_path_buf(), workdir.path().to_path_buf()).await?;

        let mut args = self.connection_args();
        args.extend([
            OsString::from("--dbname"),
            OsString::from(database),
            OsString::from("--format=directory"),
            OsString::from("--jobs"),
            OsString::from(jobs.max(1).to_string()),
            OsString::from("--exit-on-error"),
            OsString::from("--no-owner"),
            workdir.path().as_os_str().to_os_string(),
        ]);

        info!("Running {} into '{}' with {} jobs", self.tools.pg_restore, database, jobs);
        run_command(&self.tools.pg_restore, &args, &self.password_env()).await?;
        Ok(())
    }

    async fn database_exists(&self, database: &str) -> Result<bool, EngineError> {
        let pool = self.pool().await?;
        let found: Option<i32> = sqlx::query_scalar("SELECT 1 FROM pg_database WHERE datname = $1")
            .bind(database)
            .fetch_optional(pool)
            .await
            .map_err(|e| sql_error("database_exists", e))?;
        Ok(found.is_some())
    }

    async fn create_database(&self, database: &str) -> Result<(), EngineError> {
        let statement = format!("CREATE DATABASE {}", quote_identifier(database)?);
        self.execute_ddl("create_database", statement).await
    }

    async fn drop_database(&self, database: &str) -> Result<(), EngineError> {
        self.execute_ddl("drop_database", drop_statement(database, false)?)
            .await
    }

    async fn force_drop_database(&self, database: &str) -> Result<(), EngineError> {
        let pool = self.pool().await?;
        let version: String = sqlx::query_scalar("SHOW server_version_num")
            .fetch_one(pool)
            .await
            .map_err(|e| sql_error("server_version_num", e))?;
        let force = version.trim().parse::<i32>().unwrap_or(0) >= FORCE_DROP_MIN_VERSION;

        if !force {
            // Older servers: close the window as far as possible, then drop
            self.terminate_connections(database).await?;
        }
        self.execute_ddl("drop_database", drop_statement(database, force)?)
            .await
    }

    async fn rename_database(&self, from: &str, to: &str) -> Result<(), EngineError> {
        let statement = format!(
            "ALTER DATABASE {} RENAME TO {}",
            quote_identifier(from)?,
            quote_identifier(to)?
        );
        self.execute_ddl("rename_database", statement).await
    }

    async fn terminate_connections(&self, database: &str) -> Result<u64, EngineError> {
        let pool = self.pool().await?;
        let terminated: Vec<bool> = sqlx::query_scalar(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
             WHERE datname = $1 AND pid <> pg_backend_pid()",
        )
        .bind(database)
        .fetch_all(pool)
        .await
        .map_err(|e| sql_error("terminate_connections", e))?;
        Ok(terminated.into_iter().filter(|ended| *ended).count() as u64)
    }

    async fn count_user_tables(&self, database: &str) -> Result<i64, EngineError> {
        let mut conn = self
            .connect_options(database)
            .connect()
            .await
            .map_err(|e| sql_error("connect", e))?;
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_type = 'BASE TABLE' \
             AND table_schema NOT IN ('pg_catalog', 'information_schema')",
        )
        .fetch_one(&mut conn)
        .await
        .map_err(|e| sql_error("count_user_tables", e))?;
        let _ = conn.close().await;
        Ok(count)
    }
}
