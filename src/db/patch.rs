//! Create and patch payloads for the repositories.
//!
//! Patch fields use `Option<Option<T>>` for nullable columns: the outer
//! `None` means "leave unchanged", `Some(None)` means "clear".

use serde::{Deserialize, Deserializer};

use crate::db::catalog::DEFAULT_DISPLAY_TITLE;
use crate::db::models::{Beverage, DisplaySettings, ImageRef};
use crate::error::TapError;

/// Keeps an explicit JSON `null` distinguishable from an absent key.
fn explicit<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BeverageCreate {
    pub tap_number: Option<i64>,
    pub name: Option<String>,
    pub style: Option<String>,
    pub abv: Option<f64>,
    pub og: Option<f64>,
    pub sg: Option<f64>,
    pub ibu: Option<i64>,
    pub ebc: Option<i64>,
    #[serde(alias = "image_id")]
    pub image: Option<ImageRef>,
}

/// Validated beverage fields ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NewBeverage {
    pub tap_number: i64,
    pub name: String,
    pub style: Option<String>,
    pub abv: Option<f64>,
    pub og: Option<f64>,
    pub sg: Option<f64>,
    pub ibu: Option<i64>,
    pub ebc: Option<i64>,
    pub image: Option<ImageRef>,
}

impl BeverageCreate {
    pub fn new(tap_number: i64, name: impl Into<String>) -> Self {
        Self {
            tap_number: Some(tap_number),
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn abv(mut self, abv: f64) -> Self {
        self.abv = Some(abv);
        self
    }

    pub fn ibu(mut self, ibu: i64) -> Self {
        self.ibu = Some(ibu);
        self
    }

    pub fn ebc(mut self, ebc: i64) -> Self {
        self.ebc = Some(ebc);
        self
    }

    pub(crate) fn validate(self) -> Result<NewBeverage, TapError> {
        let tap_number = self
            .tap_number
            .ok_or_else(|| TapError::validation("tap_number is required"))?;
        validate_tap_number(tap_number)?;
        let name = self
            .name
            .ok_or_else(|| TapError::validation("name is required"))?;
        let name = validate_name(name)?;
        validate_metric("abv", self.abv)?;
        validate_metric("og", self.og)?;
        validate_metric("sg", self.sg)?;
        validate_count("ibu", self.ibu)?;
        validate_count("ebc", self.ebc)?;

        Ok(NewBeverage {
            tap_number,
            name,
            style: normalize_text(self.style),
            abv: self.abv,
            og: self.og,
            sg: self.sg,
            ibu: self.ibu,
            ebc: self.ebc,
            image: self.image,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BeveragePatch {
    #[serde(default, deserialize_with = "explicit")]
    pub tap_number: Option<Option<i64>>,
    #[serde(default, deserialize_with = "explicit")]
    pub name: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit")]
    pub style: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit")]
    pub abv: Option<Option<f64>>,
    #[serde(default, deserialize_with = "explicit")]
    pub og: Option<Option<f64>>,
    #[serde(default, deserialize_with = "explicit")]
    pub sg: Option<Option<f64>>,
    #[serde(default, deserialize_with = "explicit")]
    pub ibu: Option<Option<i64>>,
    #[serde(default, deserialize_with = "explicit")]
    pub ebc: Option<Option<i64>>,
    #[serde(default, deserialize_with = "explicit", alias = "image_id")]
    pub image: Option<Option<ImageRef>>,
}

impl BeveragePatch {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(Some(name.into())),
            ..Self::default()
        }
    }

    pub fn image(image: Option<ImageRef>) -> Self {
        Self {
            image: Some(image),
            ..Self::default()
        }
    }

    /// Apply onto `current`, validating every provided field.
    pub(crate) fn apply(self, current: &Beverage) -> Result<Beverage, TapError> {
        let mut next = current.clone();
        if let Some(tap_number) = self.tap_number {
            let tap_number =
                tap_number.ok_or_else(|| TapError::validation("tap_number cannot be null"))?;
            validate_tap_number(tap_number)?;
            next.tap_number = tap_number;
        }
        if let Some(name) = self.name {
            let name = name.ok_or_else(|| TapError::validation("name cannot be null"))?;
            next.name = validate_name(name)?;
        }
        if let Some(style) = self.style {
            next.style = normalize_text(style);
        }
        if let Some(abv) = self.abv {
            validate_metric("abv", abv)?;
            next.abv = abv;
        }
        if let Some(og) = self.og {
            validate_metric("og", og)?;
            next.og = og;
        }
        if let Some(sg) = self.sg {
            validate_metric("sg", sg)?;
            next.sg = sg;
        }
        if let Some(ibu) = self.ibu {
            validate_count("ibu", ibu)?;
            next.ibu = ibu;
        }
        if let Some(ebc) = self.ebc {
            validate_count("ebc", ebc)?;
            next.ebc = ebc;
        }
        if let Some(image) = self.image {
            next.image = image;
        }
        Ok(next)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SettingsCreate {
    pub title: Option<String>,
    #[serde(alias = "logo_image_id")]
    pub logo: Option<ImageRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SettingsPatch {
    #[serde(default, deserialize_with = "explicit")]
    pub title: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit", alias = "logo_image_id")]
    pub logo: Option<Option<ImageRef>>,
}

impl SettingsPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(Some(title.into())),
            ..Self::default()
        }
    }

    pub(crate) fn apply(self, current: &DisplaySettings) -> DisplaySettings {
        let mut next = current.clone();
        // Older stores declare `title` NOT NULL, so a cleared title is
        // written back as the default rather than as NULL.
        if let Some(title) = self.title {
            next.title =
                Some(normalize_text(title).unwrap_or_else(|| DEFAULT_DISPLAY_TITLE.to_string()));
        }
        if let Some(logo) = self.logo {
            next.logo = logo;
        }
        next
    }
}

fn validate_tap_number(tap_number: i64) -> Result<(), TapError> {
    if tap_number < 1 {
        return Err(TapError::validation(format!(
            "tap_number must be positive, got {tap_number}"
        )));
    }
    Ok(())
}

fn validate_name(name: String) -> Result<String, TapError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(TapError::validation("name must not be blank"));
    }
    Ok(trimmed.to_string())
}

fn validate_metric(field: &str, value: Option<f64>) -> Result<(), TapError> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(TapError::validation(format!(
            "{field} must be a non-negative number"
        ))),
        _ => Ok(()),
    }
}

fn validate_count(field: &str, value: Option<i64>) -> Result<(), TapError> {
    match value {
        Some(v) if v < 0 => Err(TapError::validation(format!(
            "{field} must not be negative"
        ))),
        _ => Ok(()),
    }
}

fn normalize_text(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
