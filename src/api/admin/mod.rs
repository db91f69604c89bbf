pub mod coupon;
pub mod image;
pub mod order;
pub mod outbox;
pub mod product;
pub mod stats;
pub mod user;

use axum::{middleware::from_fn_with_state, Router};

use crate::middleware::auth::{auth_middleware, AuthState, Role};
use crate::state::AppState;

use coupon::admin_coupon_router;
use image::admin_image_router;
use order::admin_order_router;
use outbox::admin_outbox_router;
use product::admin_product_router;
use stats::admin_stats_router;
use user::admin_user_router;

pub fn admin_api_router(state: AppState) -> Router {
    Router::new()
        .merge(admin_stats_router(state.clone()))
        .merge(admin_product_router(state.clone()))
        .merge(admin_image_router(state.clone()))
        .merge(admin_order_router(state.clone()))
        .merge(admin_user_router(state.clone()))
        .merge(admin_coupon_router(state.clone()))
        .merge(admin_outbox_router(state.clone()))
        .layer(from_fn_with_state(
            AuthState {
                state,
                role: Role::Admin,
            },
            auth_middleware,
        ))
}
