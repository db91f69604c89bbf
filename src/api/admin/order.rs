use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use sea_orm::TransactionTrait;
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::entities::order::Status;
use crate::error::ApiError;
use crate::extract::ValidJson;
use crate::services::orders::{self, AdminOrderUpdate, ShipmentOutcome};
use crate::state::AppState;

pub fn admin_order_router(state: AppState) -> Router {
    Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/:id", get(get_order).patch(update_order))
        .route("/orders/:id/shipment", post(create_shipment))
        .route("/export/orders", get(export_orders))
        .layer(Extension(state))
}

#[derive(Deserialize)]
struct OrdersQuery {
    status: Option<Status>,
}

async fn list_orders(
    Query(params): Query<OrdersQuery>,
    Extension(state): Extension<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let list = orders::list_all(state.db.as_ref(), params.status).await?;
    Ok(Json(list))
}

async fn get_order(
    Path(id): Path<i32>,
    Extension(state): Extension<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let order = orders::get(state.db.as_ref(), id, None).await?;
    Ok(Json(order))
}

async fn update_order(
    Path(id): Path<i32>,
    Extension(state): Extension<AppState>,
    ValidJson(payload): ValidJson<UpdateOrder>,
) -> Result<impl IntoResponse, ApiError> {
    let txn = state.db.begin().await?;
    let order = orders::admin_update(
        &txn,
        id,
        AdminOrderUpdate {
            status: payload.status,
            awb_code: payload.awb_code,
            courier_name: payload.courier_name,
        },
    )
    .await?;
    txn.commit().await?;

    Ok(Json(order))
}

/// Books the shipment by hand. Repeating the call never books a second one.
async fn create_shipment(
    Path(id): Path<i32>,
    Extension(state): Extension<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = orders::create_shipment(state.db.as_ref(), state.shipping.as_ref(), id).await?;

    let (status, message, order) = match outcome {
        ShipmentOutcome::Created(order) => (StatusCode::CREATED, "Shipment created", order),
        ShipmentOutcome::AlreadyCreated(order) => (StatusCode::OK, "Shipment already exists", order),
    };

    Ok((
        status,
        Json(json!({
            "message": message,
            "order_id": order.id,
            "status": order.status,
            "shipping_provider": order.shipping_provider,
            "shipping_order_id": order.shipping_order_id,
            "shipment_id": order.shipment_id,
        })),
    ))
}

async fn export_orders(Extension(state): Extension<AppState>) -> Result<impl IntoResponse, ApiError> {
    let rows = orders::export_rows(state.db.as_ref()).await?;
    Ok(Json(rows))
}

#[derive(Deserialize, Validate)]
struct UpdateOrder {
    status: Option<Status>,
    #[validate(length(min = 1, max = 64, message = "awb_code must not be empty"))]
    awb_code: Option<String>,
    #[validate(length(min = 1, max = 100, message = "courier_name must not be empty"))]
    courier_name: Option<String>,
}
