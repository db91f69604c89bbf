use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::TransactionTrait;
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::error::ApiError;
use crate::extract::ValidJson;
use crate::middleware::auth::AuthContext;
use crate::services::addresses::{self, AddressInput};
use crate::state::AppState;

pub fn address_router(state: AppState) -> Router {
    Router::new()
        .route("/addresses", get(list_addresses).post(create_address))
        .route("/addresses/:id", put(update_address).delete(delete_address))
        .route("/addresses/:id/default", post(set_default_address))
        .layer(Extension(state))
}

async fn list_addresses(
    Extension(state): Extension<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let list = addresses::list(state.db.as_ref(), auth.user.id).await?;
    Ok(Json(list))
}

async fn create_address(
    Extension(state): Extension<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(payload): ValidJson<AddressPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let txn = state.db.begin().await?;
    let created = addresses::create(&txn, auth.user.id, payload.into_input()).await?;
    txn.commit().await?;

    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_address(
    Path(id): Path<i32>,
    Extension(state): Extension<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(payload): ValidJson<AddressPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let txn = state.db.begin().await?;
    let updated = addresses::update(&txn, auth.user.id, id, payload.into_input()).await?;
    txn.commit().await?;

    Ok(Json(updated))
}

async fn delete_address(
    Path(id): Path<i32>,
    Extension(state): Extension<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let txn = state.db.begin().await?;
    addresses::delete(&txn, auth.user.id, id).await?;
    txn.commit().await?;

    Ok(Json(json!({ "message": "Address deleted" })))
}

async fn set_default_address(
    Path(id): Path<i32>,
    Extension(state): Extension<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let txn = state.db.begin().await?;
    let address = addresses::set_default(&txn, auth.user.id, id).await?;
    txn.commit().await?;

    Ok(Json(address))
}

static PINCODE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{6}$").unwrap());

#[derive(Deserialize, Validate)]
struct AddressPayload {
    #[validate(length(max = 50))]
    label: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, max = 100, message = "full_name is required"))]
    full_name: String,
    #[serde(default)]
    #[validate(length(min = 7, max = 15, message = "phone must be 7-15 characters"))]
    phone: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "address_line_1 is required"))]
    address_line_1: String,
    address_line_2: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, message = "city is required"))]
    city: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "state is required"))]
    state: String,
    #[serde(default)]
    #[validate(regex(path = *PINCODE_REGEX, message = "pincode must be 6 digits"))]
    pincode: String,
    #[serde(default)]
    is_default: bool,
}

impl AddressPayload {
    fn into_input(self) -> AddressInput {
        AddressInput {
            label: self.label,
            full_name: self.full_name.trim().to_owned(),
            phone: self.phone.trim().to_owned(),
            address_line_1: self.address_line_1,
            address_line_2: self.address_line_2.filter(|line| !line.trim().is_empty()),
            city: self.city,
            state: self.state,
            pincode: self.pincode,
            is_default: self.is_default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(pincode: &str) -> AddressPayload {
        AddressPayload {
            label: None,
            full_name: "Asha Rao".into(),
            phone: "9876543210".into(),
            address_line_1: "12 MG Road".into(),
            address_line_2: None,
            city: "Bengaluru".into(),
            state: "Karnataka".into(),
            pincode: pincode.into(),
            is_default: false,
        }
    }

    #[test]
    fn pincode_must_be_six_digits() {
        assert!(payload("560001").validate().is_ok());
        assert!(payload("56000").validate().is_err());
        assert!(payload("56000a").validate().is_err());
    }
}
