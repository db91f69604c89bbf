pub mod admin;
pub mod public;
pub mod user;

use axum::Router;

use crate::state::AppState;

use admin::admin_api_router;
use public::public_api_router;
use user::user_api_router;

pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        .merge(public_api_router(state.clone()))
        .merge(user_api_router(state.clone()))
        .nest("/admin", admin_api_router(state))
}
