pub mod api;
pub mod config;
pub mod entities;
pub mod error;
pub mod extract;
pub mod identity;
pub mod middleware;
pub mod notify;
pub mod payments;
pub mod services;
pub mod shipping;
pub mod state;

use axum::{middleware::from_fn, Router};
use tower_http::trace::TraceLayer;

use crate::api::create_api_router;
use crate::middleware::logging::logging_middleware;
use crate::state::AppState;

pub fn create_app(state: AppState) -> Router {
    create_api_router(state)
        .layer(from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http())
}
