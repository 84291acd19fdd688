use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use crate::db::StoreOptions;

pub const DEFAULT_DB_PATH: &str = "/data/opentap.db";

/// Runtime configuration.
///
/// `DB_PATH` is read unprefixed for compatibility with existing deployments;
/// everything else uses the `OPENTAP_` prefix (e.g. `OPENTAP_LISTEN_ADDR`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: String,
    pub listen_addr: String,
    pub loglevel: String,
    pub max_image_bytes: usize,
    pub busy_timeout_secs: u64,
    pub max_connections: u32,
    pub seed_on_first_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            listen_addr: "0.0.0.0:8000".to_string(),
            loglevel: "info".to_string(),
            max_image_bytes: 1_000_000,
            busy_timeout_secs: 5,
            max_connections: 1,
            seed_on_first_run: true,
        }
    }
}

impl Config {
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Env::prefixed("OPENTAP_"))
            .merge(Env::raw().only(&["DB_PATH"]))
    }

    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    /// Store file location with any `sqlite:` URL prefix removed.
    pub fn db_file(&self) -> PathBuf {
        let raw = self.db_path.trim();
        let path = raw
            .strip_prefix("sqlite://")
            .or_else(|| raw.strip_prefix("sqlite:"))
            .unwrap_or(raw);
        PathBuf::from(path)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            max_image_bytes: self.max_image_bytes,
            busy_timeout: Duration::from_secs(self.busy_timeout_secs),
            max_connections: self.max_connections.max(1),
        }
    }
}

pub static CONFIG: LazyLock<Config> = LazyLock::new(|| {
    Config::load().unwrap_or_else(|e| {
        eprintln!("invalid configuration, falling back to defaults: {e}");
        Config::default()
    })
});
