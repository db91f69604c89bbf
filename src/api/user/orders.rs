use axum::{
    extract::{Extension, Path},
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use crate::error::ApiError;
use crate::middleware::auth::AuthContext;
use crate::services::orders;
use crate::state::AppState;

pub fn order_router(state: AppState) -> Router {
    Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/:id", get(get_order))
        .layer(Extension(state))
}

async fn list_orders(
    Extension(state): Extension<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let list = orders::list_for_user(state.db.as_ref(), auth.user.id).await?;
    Ok(Json(list))
}

async fn get_order(
    Path(id): Path<i32>,
    Extension(state): Extension<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let order = orders::get(state.db.as_ref(), id, Some(auth.user.id)).await?;
    Ok(Json(order))
}
