pub mod auth;
pub mod product;
pub mod uploads;

use axum::Router;

use crate::state::AppState;

use auth::auth_router;
use product::product_router;
use uploads::uploads_router;

pub fn public_api_router(state: AppState) -> Router {
    Router::new()
        .merge(auth_router(state.clone()))
        .merge(product_router(state.clone()))
        .merge(uploads_router(state))
}
