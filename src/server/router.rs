use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

use crate::db::Repositories;
use crate::handlers::{beverages, images, settings};

/// Room for multipart framing or headers on top of the raw image bytes.
const BODY_HEADROOM: usize = 64 * 1024;

#[derive(Clone)]
pub struct TapState {
    pub repos: Repositories,
}

impl TapState {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }
}

pub fn tap_router(state: TapState) -> Router {
    // Bodies up to the headroom reach the blob store, which reports the
    // exact size; anything larger fails while buffering and `ImageUpload`
    // reports it as PayloadTooLarge.
    let body_limit = state.repos.images.max_bytes().saturating_add(BODY_HEADROOM);

    Router::new()
        .route(
            "/beers",
            get(beverages::list_beverages).post(beverages::create_beverage),
        )
        .route(
            "/beers/{id}",
            get(beverages::get_beverage)
                .patch(beverages::update_beverage)
                .delete(beverages::delete_beverage),
        )
        .route(
            "/beers/{id}/image",
            post(beverages::upload_beverage_image).delete(beverages::clear_beverage_image),
        )
        .route(
            "/settings",
            get(settings::get_settings).patch(settings::update_settings),
        )
        .route(
            "/settings/logo",
            post(settings::upload_logo).delete(settings::clear_logo),
        )
        .route("/images/{id}", get(images::get_image))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
