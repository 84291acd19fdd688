//! Database module: schema catalog, migration and repositories.
//!
//! Layout:
//! - `catalog.rs`: desired tables and columns, with the release each appeared in
//! - `store.rs`: opens the SQLite file and creates missing tables
//! - `migrate.rs`: additive column patching for stores written by older releases
//! - `models.rs` / `patch.rs`: row structs and create/patch payloads
//! - `beverages.rs`, `settings.rs`, `images.rs`: repositories

pub mod beverages;
pub mod catalog;
pub mod images;
pub mod migrate;
pub mod models;
pub mod patch;
pub mod settings;
pub mod store;

pub use beverages::BeverageRepo;
pub use images::ImageStore;
pub use migrate::{MigrationFailure, MigrationReport, Migrator};
pub use models::{Beverage, DisplaySettings, ImageRef, SETTINGS_ID, StoredImage};
pub use patch::{BeverageCreate, BeveragePatch, SettingsCreate, SettingsPatch};
pub use settings::SettingsRepo;
pub use store::{SqlitePool, Store, StoreOptions};

use std::path::Path;

use crate::error::TapError;

/// Repositories over a migrated store. Only obtainable through
/// [`Store::migrate`] / [`Store::migrate_degraded`], so nothing can query a
/// store whose schema has not been reconciled yet.
#[derive(Clone)]
pub struct Repositories {
    pub beverages: BeverageRepo,
    pub settings: SettingsRepo,
    pub images: ImageStore,
    pool: SqlitePool,
}

impl Repositories {
    pub(crate) fn new(pool: SqlitePool, options: &StoreOptions) -> Self {
        Self {
            beverages: BeverageRepo::new(pool.clone(), options.max_image_bytes),
            settings: SettingsRepo::new(pool.clone(), options.max_image_bytes),
            images: ImageStore::new(pool.clone(), options.max_image_bytes),
            pool,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Open the store at `path`, create what is missing and patch older
/// schemas forward. Never removes existing data.
pub async fn initialize_and_migrate(
    path: impl AsRef<Path>,
    options: StoreOptions,
) -> Result<Repositories, TapError> {
    Store::initialize(path, options).await?.migrate().await
}
