use axum::{Json, extract::State};
use serde::Serialize;

use crate::db::{DisplaySettings, ImageRef, SettingsPatch};
use crate::middleware::ImageUpload;
use crate::{TapError, server::TapState};

#[derive(Debug, Serialize)]
pub struct SettingsView {
    pub title: String,
    pub logo_image_id: Option<ImageRef>,
}

impl From<DisplaySettings> for SettingsView {
    fn from(s: DisplaySettings) -> Self {
        Self {
            title: s.display_title().to_string(),
            logo_image_id: s.logo,
        }
    }
}

/// GET /settings -> stored settings, or defaults if none were saved yet.
pub async fn get_settings(State(state): State<TapState>) -> Result<Json<SettingsView>, TapError> {
    Ok(Json(state.repos.settings.current().await?.into()))
}

/// PATCH /settings -> partial update, creating the row on first use.
pub async fn update_settings(
    State(state): State<TapState>,
    Json(patch): Json<SettingsPatch>,
) -> Result<Json<SettingsView>, TapError> {
    Ok(Json(state.repos.settings.upsert(patch).await?.into()))
}

pub async fn upload_logo(
    State(state): State<TapState>,
    upload: ImageUpload,
) -> Result<Json<SettingsView>, TapError> {
    let updated = state
        .repos
        .settings
        .set_logo(&upload.data, &upload.content_type)
        .await?;
    Ok(Json(updated.into()))
}

pub async fn clear_logo(State(state): State<TapState>) -> Result<Json<SettingsView>, TapError> {
    Ok(Json(state.repos.settings.clear_logo().await?.into()))
}
