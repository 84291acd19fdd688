use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;

use crate::db::{Beverage, BeverageCreate, BeveragePatch};
use crate::middleware::ImageUpload;
use crate::{TapError, server::TapState};

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub skip: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    100
}

/// GET /beers -> beverages ordered by tap number.
pub async fn list_beverages(
    State(state): State<TapState>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<Beverage>>, TapError> {
    let rows = state.repos.beverages.list_page(page.skip, page.limit).await?;
    Ok(Json(rows))
}

pub async fn get_beverage(
    State(state): State<TapState>,
    Path(id): Path<i64>,
) -> Result<Json<Beverage>, TapError> {
    Ok(Json(state.repos.beverages.get(id).await?))
}

pub async fn create_beverage(
    State(state): State<TapState>,
    Json(input): Json<BeverageCreate>,
) -> Result<(StatusCode, Json<Beverage>), TapError> {
    let created = state.repos.beverages.create(input).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_beverage(
    State(state): State<TapState>,
    Path(id): Path<i64>,
    Json(patch): Json<BeveragePatch>,
) -> Result<Json<Beverage>, TapError> {
    Ok(Json(state.repos.beverages.update(id, patch).await?))
}

pub async fn delete_beverage(
    State(state): State<TapState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, TapError> {
    state.repos.beverages.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /beers/{id}/image -> raw image body, typed by `Content-Type`.
pub async fn upload_beverage_image(
    State(state): State<TapState>,
    Path(id): Path<i64>,
    upload: ImageUpload,
) -> Result<Json<Beverage>, TapError> {
    let updated = state
        .repos
        .beverages
        .set_image(id, &upload.data, &upload.content_type)
        .await?;
    Ok(Json(updated))
}

pub async fn clear_beverage_image(
    State(state): State<TapState>,
    Path(id): Path<i64>,
) -> Result<Json<Beverage>, TapError> {
    Ok(Json(state.repos.beverages.clear_image(id).await?))
}
