pub mod addresses;
pub mod cart;
pub mod checkout;
pub mod orders;
pub mod profile;

use axum::{middleware::from_fn_with_state, Router};

use crate::middleware::auth::{auth_middleware, AuthState, Role};
use crate::state::AppState;

use addresses::address_router;
use cart::cart_router;
use checkout::checkout_router;
use orders::order_router;
use profile::profile_router;

pub fn user_api_router(state: AppState) -> Router {
    Router::new()
        .merge(profile_router(state.clone()))
        .merge(address_router(state.clone()))
        .merge(cart_router(state.clone()))
        .merge(checkout_router(state.clone()))
        .merge(order_router(state.clone()))
        .layer(from_fn_with_state(
            AuthState {
                state,
                role: Role::User,
            },
            auth_middleware,
        ))
}
