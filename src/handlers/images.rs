use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};

use crate::db::ImageRef;
use crate::{TapError, server::TapState};

/// GET /images/{id} -> raw payload with its stored content type.
pub async fn get_image(
    State(state): State<TapState>,
    Path(id): Path<i64>,
) -> Result<Response, TapError> {
    let image = state.repos.images.fetch(ImageRef(id)).await?;
    Ok((
        [
            (header::CONTENT_TYPE, image.content_type),
            (
                header::CACHE_CONTROL,
                "public, max-age=86400".to_string(),
            ),
        ],
        image.data,
    )
        .into_response())
}
