use axum::{
    extract::{Extension, Path},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use serde_json::json;
use uuid::Uuid;

use crate::entities::{order, user};
use crate::error::ApiError;
use crate::state::AppState;

pub fn admin_user_router(state: AppState) -> Router {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/:id", get(get_user))
        .layer(Extension(state))
}

async fn list_users(Extension(state): Extension<AppState>) -> Result<impl IntoResponse, ApiError> {
    let users = user::Entity::find()
        .order_by_desc(user::Column::CreatedAt)
        .all(state.db.as_ref())
        .await?;
    Ok(Json(users))
}

async fn get_user(
    Path(id): Path<Uuid>,
    Extension(state): Extension<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.as_ref();
    let user = user::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_owned()))?;

    let order_count = order::Entity::find()
        .filter(order::Column::UserId.eq(user.id))
        .count(db)
        .await?;

    Ok(Json(json!({
        "user": user,
        "order_count": order_count,
    })))
}
