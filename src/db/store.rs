use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Pool, Sqlite};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::db::catalog::CATALOG;
use crate::db::migrate::{MigrationReport, Migrator};
use crate::db::{Repositories, migrate};
use crate::error::TapError;

pub type SqlitePool = Pool<Sqlite>;

/// Write transactions take the lock up front so contention waits out
/// `busy_timeout` instead of failing on a read-to-write upgrade.
pub(crate) const BEGIN_IMMEDIATE: &str = "BEGIN IMMEDIATE";

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Largest image payload accepted by the blob store.
    pub max_image_bytes: usize,
    /// How long a statement waits on a locked database before `StoreBusy`.
    pub busy_timeout: Duration,
    pub max_connections: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_image_bytes: 1_000_000,
            busy_timeout: Duration::from_secs(5),
            max_connections: 1,
        }
    }
}

/// An opened store whose tables exist but whose columns may still lag the
/// catalog. Repositories are only handed out once it has been migrated.
pub struct Store {
    pool: SqlitePool,
    path: PathBuf,
    options: StoreOptions,
}

impl Store {
    /// Open (creating if needed) the store file and create any missing table.
    pub async fn initialize(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, TapError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                TapError::StorageUnavailable(format!(
                    "cannot create directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let connect_opts = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(options.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.busy_timeout)
            .connect_with(connect_opts)
            .await
            .map_err(|e| {
                TapError::from(e).into_unavailable(&format!("cannot open {}", path.display()))
            })?;

        // Surfaces a file that is not a database before anything else touches it.
        let existing: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table'")
                .fetch_all(&pool)
                .await
                .map_err(|e| {
                    TapError::from(e).into_unavailable(&format!("cannot read {}", path.display()))
                })?;

        let store = Self {
            pool,
            path,
            options,
        };
        store.create_missing_tables(&existing).await?;
        Ok(store)
    }

    async fn create_missing_tables(&self, existing: &[String]) -> Result<(), TapError> {
        let mut conn = self.pool.acquire().await?;
        for schema in CATALOG {
            if existing.iter().any(|t| t == schema.table) {
                continue;
            }
            migrate::create_table(&mut conn, schema)
                .await
                .map_err(|e| e.into_unavailable(&format!("cannot create table {}", schema.table)))?;
            info!(table = schema.table, "created table");
        }
        debug!(path = %self.path.display(), "store initialized");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run the additive migrator and report, without deciding what a
    /// partial failure means for the caller.
    pub async fn migrate_report(&self) -> Result<MigrationReport, TapError> {
        Migrator::new(&self.pool).run().await
    }

    /// Migrate and hand out repositories; any column that could not be
    /// retrofitted fails the whole call with `MigrationFailed`.
    pub async fn migrate(self) -> Result<Repositories, TapError> {
        let report = self.migrate_report().await?;
        report.into_result()?;
        Ok(Repositories::new(self.pool, &self.options))
    }

    /// Migrate and hand out repositories even if some columns failed, so a
    /// caller can choose to serve in degraded mode.
    pub async fn migrate_degraded(self) -> Result<(Repositories, MigrationReport), TapError> {
        let report = self.migrate_report().await?;
        Ok((Repositories::new(self.pool, &self.options), report))
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
