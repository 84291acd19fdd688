#![allow(dead_code)]

use opentap::db::{Repositories, StoreOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub fn temp_store() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("data").join("opentap.db");
    (dir, path)
}

pub async fn fresh_repos() -> (TempDir, Repositories) {
    let (dir, path) = temp_store();
    let repos = opentap::initialize_and_migrate(&path, StoreOptions::default())
        .await
        .expect("initialize fresh store");
    (dir, repos)
}

/// Run raw DDL/DML against `path` the way an older release would have.
pub async fn run_legacy_sql(path: &Path, statements: &[&str]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create legacy dir");
    }
    let opts = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .expect("open legacy store");
    for stmt in statements {
        sqlx::query(stmt)
            .execute(&pool)
            .await
            .unwrap_or_else(|e| panic!("legacy statement failed: {stmt}: {e}"));
    }
    pool.close().await;
}

pub fn png_bytes(seed: u8, len: usize) -> Vec<u8> {
    let mut data = vec![0x89, b'P', b'N', b'G'];
    data.extend(std::iter::repeat_n(seed, len.saturating_sub(4)));
    data
}
