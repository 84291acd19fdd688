use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use crate::db::catalog::DEFAULT_DISPLAY_TITLE;

/// Identity of the single display-settings row.
pub const SETTINGS_ID: i64 = 1;

/// Reference from an owning row to a `storedimage` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct ImageRef(pub i64);

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct Beverage {
    pub id: i64,
    pub tap_number: i64,
    pub name: String,
    pub style: Option<String>,
    pub abv: Option<f64>,
    pub og: Option<f64>,
    pub sg: Option<f64>,
    pub ibu: Option<i64>,
    pub ebc: Option<i64>,
    #[sqlx(rename = "image_id")]
    #[serde(rename = "image_id")]
    pub image: Option<ImageRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct DisplaySettings {
    pub id: i64,
    pub title: Option<String>,
    #[sqlx(rename = "logo_image_id")]
    #[serde(rename = "logo_image_id")]
    pub logo: Option<ImageRef>,
}

impl DisplaySettings {
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(DEFAULT_DISPLAY_TITLE)
    }
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            id: SETTINGS_ID,
            title: Some(DEFAULT_DISPLAY_TITLE.to_string()),
            logo: None,
        }
    }
}

/// What an image was uploaded for. Stored as text in the `kind` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Beer,
    Logo,
    Upload,
}

impl ImageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageKind::Beer => "beer",
            ImageKind::Logo => "logo",
            ImageKind::Upload => "upload",
        }
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct StoredImage {
    pub id: i64,
    pub kind: Option<String>,
    pub content_type: String,
    pub data: Vec<u8>,
    pub created_at: Option<DateTime<Utc>>,
}

impl StoredImage {
    pub fn image_ref(&self) -> ImageRef {
        ImageRef(self.id)
    }
}

/// Image metadata without the payload.
#[derive(Debug, Clone, Serialize, PartialEq, FromRow)]
pub struct ImageMeta {
    pub id: i64,
    pub kind: Option<String>,
    pub content_type: String,
    pub size: i64,
    pub created_at: Option<DateTime<Utc>>,
}
