use sqlx::SqliteConnection;
use tracing::debug;

use crate::db::images::{self, Owner};
use crate::db::models::{Beverage, ImageKind};
use crate::db::patch::{BeverageCreate, BeveragePatch};
use crate::db::store::{BEGIN_IMMEDIATE, SqlitePool};
use crate::error::TapError;

const SELECT_BEVERAGE: &str =
    "SELECT id, tap_number, name, style, abv, og, sg, ibu, ebc, image_id FROM beer";

fn not_found(id: i64) -> TapError {
    TapError::NotFound {
        entity: "beverage",
        id,
    }
}

async fn fetch_in(conn: &mut SqliteConnection, id: i64) -> Result<Option<Beverage>, TapError> {
    let row = sqlx::query_as::<_, Beverage>(&format!("{SELECT_BEVERAGE} WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

async fn write_in(conn: &mut SqliteConnection, b: &Beverage) -> Result<(), TapError> {
    sqlx::query(
        r#"UPDATE beer SET
            tap_number = ?,
            name = ?,
            style = ?,
            abv = ?,
            og = ?,
            sg = ?,
            ibu = ?,
            ebc = ?,
            image_id = ?
          WHERE id = ?"#,
    )
    .bind(b.tap_number)
    .bind(&b.name)
    .bind(&b.style)
    .bind(b.abv)
    .bind(b.og)
    .bind(b.sg)
    .bind(b.ibu)
    .bind(b.ebc)
    .bind(b.image)
    .bind(b.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// CRUD over the `beer` table. Each mutation is a single transaction.
#[derive(Clone)]
pub struct BeverageRepo {
    pool: SqlitePool,
    max_image_bytes: usize,
}

impl BeverageRepo {
    pub fn new(pool: SqlitePool, max_image_bytes: usize) -> Self {
        Self {
            pool,
            max_image_bytes,
        }
    }

    /// All beverages ordered by tap number, then id.
    pub async fn list(&self) -> Result<Vec<Beverage>, TapError> {
        let rows = sqlx::query_as::<_, Beverage>(&format!(
            "{SELECT_BEVERAGE} ORDER BY tap_number, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_page(&self, skip: u32, limit: u32) -> Result<Vec<Beverage>, TapError> {
        let rows = sqlx::query_as::<_, Beverage>(&format!(
            "{SELECT_BEVERAGE} ORDER BY tap_number, id LIMIT ? OFFSET ?"
        ))
        .bind(i64::from(limit))
        .bind(i64::from(skip))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get(&self, id: i64) -> Result<Beverage, TapError> {
        let mut conn = self.pool.acquire().await?;
        fetch_in(&mut conn, id).await?.ok_or_else(|| not_found(id))
    }

    pub async fn create(&self, input: BeverageCreate) -> Result<Beverage, TapError> {
        let new = input.validate()?;
        let mut tx = self.pool.begin_with(BEGIN_IMMEDIATE).await?;

        let id = sqlx::query(
            r#"INSERT INTO beer (tap_number, name, style, abv, og, sg, ibu, ebc, image_id)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL)"#,
        )
        .bind(new.tap_number)
        .bind(&new.name)
        .bind(&new.style)
        .bind(new.abv)
        .bind(new.og)
        .bind(new.sg)
        .bind(new.ibu)
        .bind(new.ebc)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        if let Some(image) = new.image {
            images::ensure_claimable(&mut tx, image, Owner::Beverage(id)).await?;
            sqlx::query("UPDATE beer SET image_id = ? WHERE id = ?")
                .bind(image)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        let created = fetch_in(&mut tx, id).await?.ok_or_else(|| not_found(id))?;
        tx.commit().await?;
        debug!(id, tap_number = created.tap_number, name = %created.name, "beverage created");
        Ok(created)
    }

    /// Apply a partial update. Changing `image` releases the previous image.
    pub async fn update(&self, id: i64, patch: BeveragePatch) -> Result<Beverage, TapError> {
        let mut tx = self.pool.begin_with(BEGIN_IMMEDIATE).await?;

        let current = fetch_in(&mut tx, id).await?.ok_or_else(|| not_found(id))?;
        let next = patch.apply(&current)?;

        if next.image != current.image
            && let Some(image) = next.image
        {
            images::ensure_claimable(&mut tx, image, Owner::Beverage(id)).await?;
        }
        write_in(&mut tx, &next).await?;
        if let Some(old) = current.image.filter(|old| Some(*old) != next.image) {
            images::release(&mut tx, old).await?;
        }

        tx.commit().await?;
        debug!(id, "beverage updated");
        Ok(next)
    }

    /// Delete the row together with the image it owned.
    pub async fn delete(&self, id: i64) -> Result<(), TapError> {
        let mut tx = self.pool.begin_with(BEGIN_IMMEDIATE).await?;

        let current = fetch_in(&mut tx, id).await?.ok_or_else(|| not_found(id))?;
        sqlx::query("DELETE FROM beer WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if let Some(image) = current.image {
            images::release(&mut tx, image).await?;
        }

        tx.commit().await?;
        debug!(id, "beverage deleted");
        Ok(())
    }

    /// Store `data` and make it this beverage's image, releasing the old one.
    pub async fn set_image(
        &self,
        id: i64,
        data: &[u8],
        content_type: &str,
    ) -> Result<Beverage, TapError> {
        images::check_payload(data, content_type, self.max_image_bytes)?;
        let mut tx = self.pool.begin_with(BEGIN_IMMEDIATE).await?;

        let current = fetch_in(&mut tx, id).await?.ok_or_else(|| not_found(id))?;
        let image = images::insert(&mut tx, ImageKind::Beer, content_type, data).await?;
        let next = Beverage {
            image: Some(image),
            ..current.clone()
        };
        write_in(&mut tx, &next).await?;
        if let Some(old) = current.image {
            images::release(&mut tx, old).await?;
        }

        tx.commit().await?;
        debug!(id, image = %image, size = data.len(), "beverage image set");
        Ok(next)
    }

    pub async fn clear_image(&self, id: i64) -> Result<Beverage, TapError> {
        self.update(id, BeveragePatch::image(None)).await
    }
}
