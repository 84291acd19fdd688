//! Binary image payloads stored alongside the structured rows.
//!
//! An image is owned by at most one row (a beer's `image_id` or the
//! settings' `logo_image_id`). When an owner replaces, clears or loses its
//! reference the old image is released in the same transaction. Images that
//! were stored but never attached are reclaimed by [`ImageStore::sweep_orphans`].

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{debug, info};

use crate::db::models::{ImageKind, ImageMeta, ImageRef, SETTINGS_ID, StoredImage};
use crate::db::store::SqlitePool;
use crate::error::TapError;

/// A row holding a reference to an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Beverage(i64),
    DisplaySettings,
}

/// Size and content-type checks, done before anything is written.
pub(crate) fn check_payload(
    data: &[u8],
    content_type: &str,
    max_bytes: usize,
) -> Result<(), TapError> {
    if data.len() > max_bytes {
        return Err(TapError::PayloadTooLarge {
            size: data.len(),
            limit: max_bytes,
        });
    }
    if data.is_empty() {
        return Err(TapError::validation("image payload is empty"));
    }
    if !content_type.trim().to_ascii_lowercase().starts_with("image/") {
        return Err(TapError::validation(format!(
            "content type must be image/*, got {content_type:?}"
        )));
    }
    Ok(())
}

pub(crate) async fn insert(
    conn: &mut SqliteConnection,
    kind: ImageKind,
    content_type: &str,
    data: &[u8],
) -> Result<ImageRef, TapError> {
    let id = sqlx::query(
        "INSERT INTO storedimage (kind, content_type, data, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(kind.as_str())
    .bind(content_type.trim())
    .bind(data)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(ImageRef(id))
}

/// Every row currently referencing `image`.
pub(crate) async fn owners(
    conn: &mut SqliteConnection,
    image: ImageRef,
) -> Result<Vec<Owner>, TapError> {
    let beers: Vec<i64> = sqlx::query_scalar("SELECT id FROM beer WHERE image_id = ? ORDER BY id")
        .bind(image)
        .fetch_all(&mut *conn)
        .await?;
    let logo: Option<i64> =
        sqlx::query_scalar("SELECT id FROM displaysettings WHERE logo_image_id = ? AND id = ?")
            .bind(image)
            .bind(SETTINGS_ID)
            .fetch_optional(&mut *conn)
            .await?;

    let mut out: Vec<Owner> = beers.into_iter().map(Owner::Beverage).collect();
    if logo.is_some() {
        out.push(Owner::DisplaySettings);
    }
    Ok(out)
}

/// Ensure `image` exists and is not held by anyone other than `claimant`.
pub(crate) async fn ensure_claimable(
    conn: &mut SqliteConnection,
    image: ImageRef,
    claimant: Owner,
) -> Result<(), TapError> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM storedimage WHERE id = ?)")
        .bind(image)
        .fetch_one(&mut *conn)
        .await?;
    if !exists {
        return Err(TapError::validation(format!("image {image} does not exist")));
    }
    if let Some(other) = owners(conn, image)
        .await?
        .into_iter()
        .find(|o| *o != claimant)
    {
        return Err(TapError::validation(format!(
            "image {image} is already owned by {other:?}"
        )));
    }
    Ok(())
}

/// Delete `image` unless some row still references it. Returns whether a
/// row was removed.
pub(crate) async fn release(conn: &mut SqliteConnection, image: ImageRef) -> Result<bool, TapError> {
    let removed = sqlx::query(
        r#"DELETE FROM storedimage
           WHERE id = ?
             AND NOT EXISTS (SELECT 1 FROM beer WHERE image_id = ?)
             AND NOT EXISTS (SELECT 1 FROM displaysettings WHERE logo_image_id = ?)"#,
    )
    .bind(image)
    .bind(image)
    .bind(image)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    debug!(image = %image, removed = removed > 0, "released image");
    Ok(removed > 0)
}

#[derive(Clone)]
pub struct ImageStore {
    pool: SqlitePool,
    max_bytes: usize,
}

impl ImageStore {
    pub fn new(pool: SqlitePool, max_bytes: usize) -> Self {
        Self { pool, max_bytes }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Store an unattached payload. The caller is expected to attach the
    /// returned reference to an owner; until then it counts as an orphan.
    pub async fn store(&self, data: &[u8], content_type: &str) -> Result<ImageRef, TapError> {
        check_payload(data, content_type, self.max_bytes)?;
        let mut conn = self.pool.acquire().await?;
        let image = insert(&mut conn, ImageKind::Upload, content_type, data).await?;
        debug!(image = %image, size = data.len(), "stored image");
        Ok(image)
    }

    pub async fn fetch(&self, image: ImageRef) -> Result<StoredImage, TapError> {
        sqlx::query_as::<_, StoredImage>(
            "SELECT id, kind, content_type, data, created_at FROM storedimage WHERE id = ?",
        )
        .bind(image)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(TapError::NotFound {
            entity: "image",
            id: image.0,
        })
    }

    pub async fn list(&self) -> Result<Vec<ImageMeta>, TapError> {
        let rows = sqlx::query_as::<_, ImageMeta>(
            r#"SELECT id, kind, content_type, length(data) AS size, created_at
               FROM storedimage ORDER BY id"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Best-effort removal; a referenced image is left in place.
    pub async fn release(&self, image: ImageRef) -> Result<bool, TapError> {
        let mut conn = self.pool.acquire().await?;
        release(&mut conn, image).await
    }

    pub async fn owners(&self, image: ImageRef) -> Result<Vec<Owner>, TapError> {
        let mut conn = self.pool.acquire().await?;
        owners(&mut conn, image).await
    }

    /// Remove every image no row references. Meant to run before serving,
    /// when no upload can be waiting to be attached.
    pub async fn sweep_orphans(&self) -> Result<u64, TapError> {
        let removed = sqlx::query(
            r#"DELETE FROM storedimage
               WHERE id NOT IN (SELECT image_id FROM beer WHERE image_id IS NOT NULL)
                 AND id NOT IN (SELECT logo_image_id FROM displaysettings WHERE logo_image_id IS NOT NULL)"#,
        )
        .execute(&self.pool)
        .await?
        .rows_affected();
        if removed > 0 {
            info!(removed, "swept orphaned images");
        }
        Ok(removed)
    }
}
