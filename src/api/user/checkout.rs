use axum::{
    extract::Extension, http::StatusCode, response::IntoResponse, routing::post, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use validator::Validate;

use crate::entities::order::PaymentMethod;
use crate::error::ApiError;
use crate::extract::ValidJson;
use crate::middleware::auth::AuthContext;
use crate::services::checkout::{
    self, BuyNowItem, CheckoutRequest, CheckoutSettings, VerifyPayment,
};
use crate::services::{orders, outbox};
use crate::state::AppState;

pub fn checkout_router(state: AppState) -> Router {
    Router::new()
        .route("/checkout/cart", post(checkout_cart))
        .route("/checkout/buy-now", post(buy_now))
        .route("/payments/razorpay/create-order", post(create_gateway_order))
        .route("/payments/razorpay/verify", post(verify_payment))
        .layer(Extension(state))
}

fn settings(state: &AppState) -> CheckoutSettings {
    CheckoutSettings {
        stale_order_minutes: state.config.checkout.stale_order_minutes,
        outbox_max_attempts: state.config.outbox.max_attempts,
    }
}

async fn checkout_cart(
    Extension(state): Extension<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(payload): ValidJson<CheckoutPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let request = payload.into_request()?;
    let order = checkout::checkout_cart(&state.db, &auth.user, request, settings(&state)).await?;

    placed(&state, order.id, order.payment_method).await
}

async fn buy_now(
    Extension(state): Extension<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(payload): ValidJson<BuyNowPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let (Some(product_id), Some(quantity)) = (payload.product_id, payload.quantity) else {
        return Err(ApiError::BadRequest("product_id and quantity are required".to_owned()));
    };
    let item = BuyNowItem {
        product_id,
        variant_id: payload.variant_id,
        quantity,
    };
    let request = payload.checkout.into_request()?;

    let order = checkout::buy_now(&state.db, &auth.user, item, request, settings(&state)).await?;

    placed(&state, order.id, order.payment_method).await
}

/// Response for a freshly placed order. Direct orders have their follow-up
/// tasks run right away.
async fn placed(
    state: &AppState,
    order_id: i32,
    payment_method: PaymentMethod,
) -> Result<(StatusCode, Json<orders::OrderView>), ApiError> {
    if !payment_method.is_online() {
        outbox::dispatch_for_order(state, order_id).await;
    }

    let view = orders::get(state.db.as_ref(), order_id, None).await?;
    info!(order_id, status = ?view.status, "Order placed");
    Ok((StatusCode::CREATED, Json(view)))
}

async fn create_gateway_order(
    Extension(state): Extension<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(payload): ValidJson<CreateGatewayOrder>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(order_id) = payload.order_id else {
        return Err(ApiError::BadRequest("order_id is required".to_owned()));
    };

    let gateway_order = checkout::create_gateway_order(
        &state.db,
        state.payments.as_ref(),
        auth.user.id,
        order_id,
    )
    .await?;

    Ok(Json(gateway_order))
}

async fn verify_payment(
    Extension(state): Extension<AppState>,
    Extension(auth): Extension<AuthContext>,
    ValidJson(payload): ValidJson<VerifyPaymentPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let verified = checkout::verify_payment(
        &state.db,
        state.payments.as_ref(),
        auth.user.id,
        VerifyPayment {
            razorpay_order_id: payload.razorpay_order_id,
            razorpay_payment_id: payload.razorpay_payment_id,
            razorpay_signature: payload.razorpay_signature,
        },
        settings(&state),
    )
    .await?;

    if !verified.replay {
        outbox::dispatch_for_order(&state, verified.order.id).await;
    }

    Ok(Json(json!({
        "message": "Payment verified",
        "order_id": verified.order.id,
        "status": verified.order.status,
    })))
}

#[derive(Deserialize, Validate)]
struct CheckoutPayload {
    address_id: Option<i32>,
    #[validate(required(message = "payment_method must be one of razorpay, cod, whatsapp"))]
    payment_method: Option<PaymentMethod>,
    #[validate(length(max = 50))]
    coupon_code: Option<String>,
}

impl CheckoutPayload {
    fn into_request(self) -> Result<CheckoutRequest, ApiError> {
        let payment_method = self.payment_method.ok_or_else(|| {
            ApiError::BadRequest("payment_method is required".to_owned())
        })?;

        Ok(CheckoutRequest {
            address_id: self.address_id,
            payment_method,
            coupon_code: self.coupon_code.filter(|code| !code.trim().is_empty()),
        })
    }
}

#[derive(Deserialize, Validate)]
struct BuyNowPayload {
    #[validate(required(message = "product_id is required"))]
    product_id: Option<i32>,
    variant_id: Option<i32>,
    #[validate(required(message = "quantity is required"), range(min = 1, message = "quantity must be at least 1"))]
    quantity: Option<i32>,
    #[serde(flatten)]
    #[validate(nested)]
    checkout: CheckoutPayload,
}

#[derive(Deserialize, Validate)]
struct CreateGatewayOrder {
    #[validate(required(message = "order_id is required"))]
    order_id: Option<i32>,
}

#[derive(Deserialize, Validate)]
struct VerifyPaymentPayload {
    #[serde(default)]
    #[validate(length(min = 1, message = "razorpay_order_id is required"))]
    razorpay_order_id: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "razorpay_payment_id is required"))]
    razorpay_payment_id: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "razorpay_signature is required"))]
    razorpay_signature: String,
}
