use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use sea_orm::TransactionTrait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use validator::Validate;

use crate::error::ApiError;
use crate::extract::ValidJson;
use crate::middleware::auth::AuthContext;
use crate::services::cart::{self, AddItem};
use crate::state::AppState;

pub fn cart_router(state: AppState) -> Router {
    Router::new()
        .route("/cart", get(get_cart))
        .route("/cart/add", post(add_to_cart))
        .route("/cart/items/:id", put(update_item).delete(remove_item))
        .route("/cart/clear", delete(clear_cart))
        .layer(Extension(state))
}

async fn get_cart(
    Extension(state): Extension<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let view = cart::cart_view(state.db.as_ref(), auth.user.id).await?;
    Ok(Json(view))
}

async fn add_to_cart(
    Extension(state): Extension<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(payload): ValidJson<AddToCart>,
) -> Result<impl IntoResponse, ApiError> {
    let (Some(product_id), Some(quantity)) = (payload.product_id, payload.quantity) else {
        return Err(ApiError::BadRequest("product_id and quantity are required".to_owned()));
    };

    let txn = state.db.begin().await?;
    let item = cart::add_item(
        &txn,
        auth.user.id,
        AddItem {
            product_id,
            variant_id: payload.variant_id,
            quantity,
        },
    )
    .await?;
    txn.commit().await?;

    info!(user_id = %auth.user.id, item_id = item.id, "Cart updated");
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Added to cart",
            "item_id": item.id,
            "quantity": item.quantity,
        })),
    ))
}

async fn update_item(
    Path(id): Path<i32>,
    Extension(state): Extension<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(payload): ValidJson<UpdateQuantity>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(quantity) = payload.quantity else {
        return Err(ApiError::BadRequest("quantity is required".to_owned()));
    };

    let txn = state.db.begin().await?;
    cart::update_quantity(&txn, auth.user.id, id, quantity).await?;
    let view = cart::cart_view(&txn, auth.user.id).await?;
    txn.commit().await?;

    Ok(Json(view))
}

async fn remove_item(
    Path(id): Path<i32>,
    Extension(state): Extension<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let txn = state.db.begin().await?;
    cart::remove_item(&txn, auth.user.id, id).await?;
    txn.commit().await?;

    Ok(Json(json!({ "message": "Item removed" })))
}

async fn clear_cart(
    Extension(state): Extension<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let removed = cart::clear_cart(state.db.as_ref(), auth.user.id).await?;
    Ok(Json(json!({ "message": "Cart cleared", "removed": removed })))
}

#[derive(Deserialize, Validate)]
struct AddToCart {
    #[validate(required(message = "product_id is required"))]
    product_id: Option<i32>,
    variant_id: Option<i32>,
    #[validate(required(message = "quantity is required"), range(min = 1, message = "quantity must be at least 1"))]
    quantity: Option<i32>,
}

#[derive(Deserialize, Validate)]
struct UpdateQuantity {
    #[validate(required(message = "quantity is required"), range(min = 1, message = "quantity must be at least 1"))]
    quantity: Option<i32>,
}
