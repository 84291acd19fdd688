use sqlx::SqliteConnection;
use tracing::debug;

use crate::db::catalog::DEFAULT_DISPLAY_TITLE;
use crate::db::images::{self, Owner};
use crate::db::models::{DisplaySettings, ImageKind, ImageRef, SETTINGS_ID};
use crate::db::patch::{SettingsCreate, SettingsPatch};
use crate::db::store::{BEGIN_IMMEDIATE, SqlitePool};
use crate::error::TapError;

fn not_found(id: i64) -> TapError {
    TapError::NotFound {
        entity: "display settings",
        id,
    }
}

async fn fetch_in(conn: &mut SqliteConnection) -> Result<Option<DisplaySettings>, TapError> {
    let row = sqlx::query_as::<_, DisplaySettings>(
        "SELECT id, title, logo_image_id FROM displaysettings WHERE id = ?",
    )
    .bind(SETTINGS_ID)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

async fn write_in(conn: &mut SqliteConnection, s: &DisplaySettings) -> Result<(), TapError> {
    sqlx::query("UPDATE displaysettings SET title = ?, logo_image_id = ? WHERE id = ?")
        .bind(&s.title)
        .bind(s.logo)
        .bind(SETTINGS_ID)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn insert_in(
    conn: &mut SqliteConnection,
    title: &str,
    logo: Option<ImageRef>,
) -> Result<DisplaySettings, TapError> {
    sqlx::query("INSERT INTO displaysettings (id, title, logo_image_id) VALUES (?, ?, ?)")
        .bind(SETTINGS_ID)
        .bind(title)
        .bind(logo)
        .execute(&mut *conn)
        .await?;
    fetch_in(conn).await?.ok_or_else(|| not_found(SETTINGS_ID))
}

/// Apply `patch` to `current`, claiming a new logo and releasing the old one.
async fn apply_in(
    conn: &mut SqliteConnection,
    current: &DisplaySettings,
    patch: SettingsPatch,
) -> Result<DisplaySettings, TapError> {
    let next = patch.apply(current);
    if next.logo != current.logo
        && let Some(logo) = next.logo
    {
        images::ensure_claimable(conn, logo, Owner::DisplaySettings).await?;
    }
    write_in(conn, &next).await?;
    if let Some(old) = current.logo.filter(|old| Some(*old) != next.logo) {
        images::release(conn, old).await?;
    }
    Ok(next)
}

/// Access to the singleton display-settings row (`id = 1`).
#[derive(Clone)]
pub struct SettingsRepo {
    pool: SqlitePool,
    max_image_bytes: usize,
}

impl SettingsRepo {
    pub fn new(pool: SqlitePool, max_image_bytes: usize) -> Self {
        Self {
            pool,
            max_image_bytes,
        }
    }

    /// Zero or one row.
    pub async fn list(&self) -> Result<Vec<DisplaySettings>, TapError> {
        let mut conn = self.pool.acquire().await?;
        Ok(fetch_in(&mut conn).await?.into_iter().collect())
    }

    pub async fn get(&self, id: i64) -> Result<DisplaySettings, TapError> {
        if id != SETTINGS_ID {
            return Err(not_found(id));
        }
        let mut conn = self.pool.acquire().await?;
        fetch_in(&mut conn).await?.ok_or_else(|| not_found(id))
    }

    /// The stored settings, or defaults when the row has not been created.
    pub async fn current(&self) -> Result<DisplaySettings, TapError> {
        let mut conn = self.pool.acquire().await?;
        Ok(fetch_in(&mut conn).await?.unwrap_or_default())
    }

    /// Create the singleton row. Fails if it already exists.
    pub async fn create(&self, input: SettingsCreate) -> Result<DisplaySettings, TapError> {
        let mut tx = self.pool.begin_with(BEGIN_IMMEDIATE).await?;
        if fetch_in(&mut tx).await?.is_some() {
            return Err(TapError::validation("display settings already exist"));
        }
        if let Some(logo) = input.logo {
            images::ensure_claimable(&mut tx, logo, Owner::DisplaySettings).await?;
        }

        let title = input
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_DISPLAY_TITLE.to_string());
        let created = insert_in(&mut tx, &title, input.logo).await?;
        tx.commit().await?;
        debug!(title = %created.display_title(), "display settings created");
        Ok(created)
    }

    pub async fn update(&self, patch: SettingsPatch) -> Result<DisplaySettings, TapError> {
        let mut tx = self.pool.begin_with(BEGIN_IMMEDIATE).await?;
        let current = fetch_in(&mut tx)
            .await?
            .ok_or_else(|| not_found(SETTINGS_ID))?;
        let next = apply_in(&mut tx, &current, patch).await?;
        tx.commit().await?;
        debug!("display settings updated");
        Ok(next)
    }

    /// Like `update`, but a missing row is first created from defaults in
    /// the same transaction.
    pub async fn upsert(&self, patch: SettingsPatch) -> Result<DisplaySettings, TapError> {
        let mut tx = self.pool.begin_with(BEGIN_IMMEDIATE).await?;
        let current = match fetch_in(&mut tx).await? {
            Some(row) => row,
            None => insert_in(&mut tx, DEFAULT_DISPLAY_TITLE, None).await?,
        };
        let next = apply_in(&mut tx, &current, patch).await?;
        tx.commit().await?;
        debug!("display settings saved");
        Ok(next)
    }

    /// Store `data` as the logo, releasing the previous one. Creates the
    /// settings row from defaults if it does not exist yet.
    pub async fn set_logo(&self, data: &[u8], content_type: &str) -> Result<DisplaySettings, TapError> {
        images::check_payload(data, content_type, self.max_image_bytes)?;
        let mut tx = self.pool.begin_with(BEGIN_IMMEDIATE).await?;

        let current = match fetch_in(&mut tx).await? {
            Some(row) => row,
            None => insert_in(&mut tx, DEFAULT_DISPLAY_TITLE, None).await?,
        };
        let logo = images::insert(&mut tx, ImageKind::Logo, content_type, data).await?;
        let next = DisplaySettings {
            logo: Some(logo),
            ..current.clone()
        };
        write_in(&mut tx, &next).await?;
        if let Some(old) = current.logo {
            images::release(&mut tx, old).await?;
        }

        tx.commit().await?;
        debug!(logo = %logo, size = data.len(), "logo set");
        Ok(next)
    }

    pub async fn clear_logo(&self) -> Result<DisplaySettings, TapError> {
        self.update(SettingsPatch {
            logo: Some(None),
            ..SettingsPatch::default()
        })
        .await
    }
}
