use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, QueryOrder, Set};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::entities::coupon::{self, CouponKind};
use crate::error::ApiError;
use crate::extract::ValidJson;
use crate::services::coupons;
use crate::state::AppState;

pub fn admin_coupon_router(state: AppState) -> Router {
    Router::new()
        .route("/coupons", get(list_coupons).post(create_coupon))
        .route("/coupons/:id", delete(delete_coupon))
        .layer(Extension(state))
}

async fn list_coupons(Extension(state): Extension<AppState>) -> Result<impl IntoResponse, ApiError> {
    let list = coupon::Entity::find()
        .order_by_desc(coupon::Column::CreatedAt)
        .all(state.db.as_ref())
        .await?;
    Ok(Json(list))
}

async fn create_coupon(
    Extension(state): Extension<AppState>,
    ValidJson(payload): ValidJson<CreateCoupon>,
) -> Result<impl IntoResponse, ApiError> {
    let (Some(kind), Some(value)) = (payload.kind, payload.value) else {
        return Err(ApiError::BadRequest("kind and value are required".to_owned()));
    };
    coupons::check_value(kind, value).map_err(|msg| ApiError::BadRequest(msg.to_owned()))?;

    let db = state.db.as_ref();
    let code = coupons::normalize_code(&payload.code);
    if coupons::find_by_code(db, &code).await?.is_some() {
        return Err(ApiError::Conflict(format!("Coupon {code} already exists")));
    }

    let created = coupon::ActiveModel {
        code: Set(code),
        kind: Set(kind),
        value: Set(value.round_dp(2)),
        active: Set(payload.active.unwrap_or(true)),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

async fn delete_coupon(
    Path(id): Path<i32>,
    Extension(state): Extension<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let result = coupon::Entity::delete_by_id(id)
        .exec(state.db.as_ref())
        .await?;
    if result.rows_affected == 0 {
        return Err(ApiError::NotFound("Coupon not found".to_owned()));
    }

    Ok(Json(json!({ "message": "Coupon deleted" })))
}

#[derive(Deserialize, Validate)]
struct CreateCoupon {
    #[serde(default)]
    #[validate(length(min = 1, max = 50, message = "code is required"))]
    code: String,
    #[validate(required(message = "kind must be percentage or flat"))]
    kind: Option<CouponKind>,
    #[validate(required(message = "value is required"))]
    value: Option<Decimal>,
    active: Option<bool>,
}
