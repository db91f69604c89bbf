use axum::{extract::Extension, response::IntoResponse, routing::get, Json, Router};
use sea_orm::{EntityTrait, PaginatorTrait};
use serde_json::json;

use crate::entities::{order, product, user};
use crate::error::ApiError;
use crate::state::AppState;

pub fn admin_stats_router(state: AppState) -> Router {
    Router::new()
        .route("/stats", get(get_stats))
        .layer(Extension(state))
}

async fn get_stats(Extension(state): Extension<AppState>) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.as_ref();

    let products = product::Entity::find().count(db).await?;
    let orders = order::Entity::find().count(db).await?;
    let users = user::Entity::find().count(db).await?;

    Ok(Json(json!({
        "products": products,
        "orders": orders,
        "users": users,
    })))
}
