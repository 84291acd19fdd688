use axum::{
    RequestExt,
    body::Bytes,
    extract::{FromRequest, Request},
    http::{StatusCode, header},
};
use axum_extra::TypedHeader;
use headers::ContentType;

use crate::{TapError, server::TapState};

/// Raw image body typed by its `Content-Type` header.
///
/// Rejections come back as `TapError`, so a body cut off by the router's
/// length limit still answers with the JSON `PAYLOAD_TOO_LARGE` shape.
pub struct ImageUpload {
    pub content_type: String,
    pub data: Bytes,
}

impl FromRequest<TapState> for ImageUpload {
    type Rejection = TapError;

    async fn from_request(mut req: Request, state: &TapState) -> Result<Self, Self::Rejection> {
        let TypedHeader(content_type) = req
            .extract_parts::<TypedHeader<ContentType>>()
            .await
            .map_err(|_| TapError::validation("image upload needs a Content-Type header"))?;

        let limit = state.repos.images.max_bytes();
        let declared = req
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());

        let data = Bytes::from_request(req, state).await.map_err(|rejection| {
            if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                TapError::PayloadTooLarge {
                    size: declared.unwrap_or(limit.saturating_add(1)),
                    limit,
                }
            } else {
                TapError::validation(rejection.body_text())
            }
        })?;

        Ok(Self {
            content_type: content_type.to_string(),
            data,
        })
    }
}
