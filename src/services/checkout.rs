//! Checkout orchestration: cart or buy-now line to order, gateway order,
//! payment verification.
//!
//! Stock is checked when an order is placed and decremented only when it is
//! paid (online) or immediately (direct methods). Nothing is reserved in
//! between, so two concurrent checkouts of the last unit can both succeed and
//! drive stock negative. The decrement logs that case instead of blocking it.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::{
    address,
    order::{self, CheckoutSource, PaymentMethod, Status},
    order_item,
    outbox_task::TaskKind,
    product, user, variant,
};
use crate::error::ApiError;
use crate::payments::{PaymentError, PaymentGateway};
use crate::services::{
    addresses,
    cart::{self, CartError},
    coupons::{self, CouponError},
    outbox,
};

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Your cart is empty")]
    CartEmpty,
    #[error("Insufficient stock for {product}: {available} available, {requested} requested")]
    InsufficientStock {
        product: String,
        variant_id: Option<i32>,
        available: i32,
        requested: i32,
    },
    #[error("A shipping address is required")]
    AddressRequired,
    #[error("Invalid shipping address")]
    InvalidAddress,
    #[error("Order is {0:?}, which does not allow this operation")]
    InvalidOrderState(Status),
    #[error("Payment verification failed")]
    PaymentVerificationFailed,
    #[error("Order total is zero, nothing to pay online")]
    NothingToPay,
    #[error("Order not found")]
    OrderNotFound,
    #[error("Unauthorized")]
    Unauthorized,
    #[error(transparent)]
    Cart(#[from] CartError),
    #[error(transparent)]
    Coupon(#[from] CouponError),
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::CartEmpty
            | CheckoutError::InsufficientStock { .. }
            | CheckoutError::AddressRequired
            | CheckoutError::InvalidAddress
            | CheckoutError::PaymentVerificationFailed
            | CheckoutError::NothingToPay
            | CheckoutError::Coupon(CouponError::Invalid | CouponError::AlreadyUsed) => {
                ApiError::BadRequest(err.to_string())
            }
            CheckoutError::InvalidOrderState(_) => ApiError::Conflict(err.to_string()),
            CheckoutError::OrderNotFound => ApiError::NotFound(err.to_string()),
            CheckoutError::Unauthorized => ApiError::Forbidden(err.to_string()),
            CheckoutError::Cart(err) => err.into(),
            CheckoutError::Coupon(CouponError::Database(err)) | CheckoutError::Database(err) => {
                err.into()
            }
            CheckoutError::Payment(err) => ApiError::Internal(err.to_string()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CheckoutRequest {
    pub address_id: Option<i32>,
    pub payment_method: PaymentMethod,
    pub coupon_code: Option<String>,
}

#[derive(Clone, Debug)]
pub struct BuyNowItem {
    pub product_id: i32,
    pub variant_id: Option<i32>,
    pub quantity: i32,
}

#[derive(Clone, Debug)]
pub struct VerifyPayment {
    pub razorpay_order_id: String,
    pub razorpay_payment_id: String,
    pub razorpay_signature: String,
}

#[derive(Debug, Serialize)]
pub struct GatewayOrder {
    pub razorpay_order_id: String,
    pub amount: i64,
    pub currency: String,
    pub key_id: String,
}

#[derive(Debug)]
pub struct Verified {
    pub order: order::Model,
    /// The same payment had already been verified; nothing changed.
    pub replay: bool,
}

/// Settings the orchestrator needs from configuration.
#[derive(Clone, Copy, Debug)]
pub struct CheckoutSettings {
    pub stale_order_minutes: i64,
    pub outbox_max_attempts: i32,
}

struct PlannedLine {
    product: product::Model,
    variant: Option<variant::Model>,
    quantity: i32,
    unit_price: Decimal,
}

impl PlannedLine {
    fn subtotal(&self) -> Decimal {
        (Decimal::from(self.quantity) * self.unit_price).round_dp(2)
    }

    fn check_stock(&self) -> Result<(), CheckoutError> {
        match &self.variant {
            Some(variant) if variant.stock < self.quantity => {
                Err(CheckoutError::InsufficientStock {
                    product: format!("{} ({}/{})", self.product.name, variant.color, variant.size),
                    variant_id: Some(variant.id),
                    available: variant.stock,
                    requested: self.quantity,
                })
            }
            _ => Ok(()),
        }
    }
}

/// Deletes the user's own unpaid `pending_payment` orders older than
/// `max_age_minutes`. Returns how many were removed.
pub async fn cleanup_stale_orders<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    max_age_minutes: i64,
) -> Result<u64, DbErr> {
    let cutoff = Utc::now() - Duration::minutes(max_age_minutes);

    let stale: Vec<i32> = order::Entity::find()
        .filter(order::Column::UserId.eq(user_id))
        .filter(order::Column::Status.eq(Status::PendingPayment))
        .filter(order::Column::RazorpayPaymentId.is_null())
        .all(db)
        .await?
        .into_iter()
        .filter(|order| order.created_at < cutoff)
        .map(|order| order.id)
        .collect();

    if stale.is_empty() {
        return Ok(0);
    }

    order_item::Entity::delete_many()
        .filter(order_item::Column::OrderId.is_in(stale.clone()))
        .exec(db)
        .await?;
    let deleted = order::Entity::delete_many()
        .filter(order::Column::Id.is_in(stale))
        .exec(db)
        .await?;

    info!(%user_id, count = deleted.rows_affected, "Removed stale pending orders");
    Ok(deleted.rows_affected)
}

/// Runs the stale-order cleanup in its own transaction, so it sticks even
/// when the checkout that follows is rejected.
async fn remove_stale_orders(
    db: &DatabaseConnection,
    user_id: Uuid,
    max_age_minutes: i64,
) -> Result<u64, DbErr> {
    let txn = db.begin().await?;
    let removed = cleanup_stale_orders(&txn, user_id, max_age_minutes).await?;
    txn.commit().await?;
    Ok(removed)
}

/// Online payments need an explicit address; direct orders may fall back to
/// the user's default.
async fn resolve_address<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    address_id: Option<i32>,
    method: PaymentMethod,
) -> Result<address::Model, CheckoutError> {
    match address_id {
        Some(id) => address::Entity::find_by_id(id)
            .one(db)
            .await?
            .filter(|address| address.user_id == user_id)
            .ok_or(CheckoutError::InvalidAddress),
        None if method.is_online() => Err(CheckoutError::AddressRequired),
        None => addresses::find_default(db, user_id)
            .await?
            .ok_or(CheckoutError::AddressRequired),
    }
}

/// Decrements variant stock for each order line.
pub async fn decrement_stock<C: ConnectionTrait>(
    db: &C,
    items: &[order_item::Model],
) -> Result<(), DbErr> {
    for item in items {
        let Some(variant_id) = item.variant_id else {
            continue;
        };
        let Some(variant) = variant::Entity::find_by_id(variant_id).one(db).await? else {
            warn!(variant_id, order_id = item.order_id, "Ordered variant no longer exists");
            continue;
        };

        let remaining = variant.stock - item.quantity;
        if remaining < 0 {
            warn!(
                variant_id,
                order_id = item.order_id,
                stock = variant.stock,
                quantity = item.quantity,
                "Stock went negative, concurrent checkouts oversold this variant"
            );
        }

        let mut active: variant::ActiveModel = variant.into();
        active.stock = Set(remaining);
        active.update(db).await?;
    }
    Ok(())
}

async fn place_order<C: ConnectionTrait>(
    db: &C,
    user: &user::Model,
    request: &CheckoutRequest,
    lines: Vec<PlannedLine>,
    source: CheckoutSource,
    settings: CheckoutSettings,
) -> Result<order::Model, CheckoutError> {
    if lines.is_empty() {
        return Err(CheckoutError::CartEmpty);
    }

    let address =
        resolve_address(db, user.id, request.address_id, request.payment_method).await?;

    for line in &lines {
        line.check_stock()?;
    }

    let total: Decimal = lines.iter().map(PlannedLine::subtotal).sum();

    let coupon = match request.coupon_code.as_deref().map(str::trim) {
        Some(code) if !code.is_empty() => Some(coupons::apply(db, user.id, code, total).await?),
        _ => None,
    };
    let discount = coupon
        .as_ref()
        .map(|(_, discount)| *discount)
        .unwrap_or(Decimal::ZERO);

    let direct = !request.payment_method.is_online();
    let now = Utc::now();

    let order = order::ActiveModel {
        user_id: Set(user.id),
        status: Set(if direct {
            Status::PendingWhatsapp
        } else {
            Status::PendingPayment
        }),
        total_amount: Set(total),
        discount_amount: Set(discount),
        payment_method: Set(request.payment_method),
        checkout_source: Set(source),
        coupon_id: Set(coupon.as_ref().map(|(coupon, _)| coupon.id)),
        razorpay_order_id: Set(None),
        razorpay_payment_id: Set(None),
        shipping_name: Set(address.full_name),
        shipping_phone: Set(address.phone),
        shipping_address_line_1: Set(address.address_line_1),
        shipping_address_line_2: Set(address.address_line_2),
        shipping_city: Set(address.city),
        shipping_state: Set(address.state),
        shipping_pincode: Set(address.pincode),
        shipping_provider: Set(None),
        shipping_order_id: Set(None),
        shipment_id: Set(None),
        awb_code: Set(None),
        courier_name: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    let mut items = Vec::with_capacity(lines.len());
    for line in &lines {
        let item = order_item::ActiveModel {
            order_id: Set(order.id),
            product_id: Set(line.product.id),
            variant_id: Set(line.variant.as_ref().map(|v| v.id)),
            quantity: Set(line.quantity),
            price_at_time: Set(line.unit_price),
            subtotal: Set(line.subtotal()),
            ..Default::default()
        }
        .insert(db)
        .await?;
        items.push(item);
    }

    if direct {
        decrement_stock(db, &items).await?;
        if let Some((coupon, _)) = &coupon {
            coupons::record_usage(db, coupon.id, user.id, order.id).await?;
        }
        if source == CheckoutSource::Cart {
            cart::clear_cart(db, user.id).await?;
        }
        outbox::enqueue(db, order.id, TaskKind::AdminEmail, settings.outbox_max_attempts).await?;
    }

    info!(
        order_id = order.id,
        user_id = %user.id,
        total = %total,
        method = ?request.payment_method,
        "Order placed"
    );
    Ok(order)
}

#[instrument(skip(db, user, request, settings), fields(user_id = %user.id))]
pub async fn checkout_cart(
    db: &DatabaseConnection,
    user: &user::Model,
    request: CheckoutRequest,
    settings: CheckoutSettings,
) -> Result<order::Model, CheckoutError> {
    remove_stale_orders(db, user.id, settings.stale_order_minutes).await?;

    let txn = db.begin().await?;

    let lines: Vec<PlannedLine> = cart::cart_lines(&txn, user.id)
        .await?
        .into_iter()
        .map(|line| PlannedLine {
            quantity: line.item.quantity,
            unit_price: line.item.price_at_time.round_dp(2),
            product: line.product,
            variant: line.variant,
        })
        .collect();

    let order = place_order(&txn, user, &request, lines, CheckoutSource::Cart, settings).await?;
    txn.commit().await?;
    Ok(order)
}

#[instrument(skip(db, user, request, settings), fields(user_id = %user.id))]
pub async fn buy_now(
    db: &DatabaseConnection,
    user: &user::Model,
    item: BuyNowItem,
    request: CheckoutRequest,
    settings: CheckoutSettings,
) -> Result<order::Model, CheckoutError> {
    if item.quantity < 1 {
        return Err(CartError::InvalidQuantity.into());
    }

    remove_stale_orders(db, user.id, settings.stale_order_minutes).await?;

    let txn = db.begin().await?;

    let (product, variant) = cart::resolve_product(&txn, item.product_id, item.variant_id).await?;
    let unit_price = match &variant {
        Some(variant) => variant.unit_price(product.price),
        None => product.price.round_dp(2),
    };
    let lines = vec![PlannedLine {
        product,
        variant,
        quantity: item.quantity,
        unit_price,
    }];

    let order = place_order(&txn, user, &request, lines, CheckoutSource::BuyNow, settings).await?;
    txn.commit().await?;
    Ok(order)
}

fn owned_by(order: Option<order::Model>, user_id: Uuid) -> Result<order::Model, CheckoutError> {
    let order = order.ok_or(CheckoutError::OrderNotFound)?;
    if order.user_id != user_id {
        return Err(CheckoutError::Unauthorized);
    }
    Ok(order)
}

/// Creates (or returns the already created) gateway order for a pending order.
#[instrument(skip(db, payments))]
pub async fn create_gateway_order(
    db: &DatabaseConnection,
    payments: &dyn PaymentGateway,
    user_id: Uuid,
    order_id: i32,
) -> Result<GatewayOrder, CheckoutError> {
    let found = order::Entity::find_by_id(order_id).one(db).await?;
    let order = owned_by(found, user_id)?;

    if order.status != Status::PendingPayment {
        return Err(CheckoutError::InvalidOrderState(order.status));
    }

    let amount = order.payable_minor_units();
    let reply = |razorpay_order_id: String| GatewayOrder {
        razorpay_order_id,
        amount,
        currency: payments.currency().to_owned(),
        key_id: payments.key_id().to_owned(),
    };

    if let Some(existing) = order.razorpay_order_id.clone() {
        return Ok(reply(existing));
    }
    if amount <= 0 {
        return Err(CheckoutError::NothingToPay);
    }

    let gateway_id = payments
        .create_order(amount, &format!("order_{}", order.id))
        .await?;

    let mut active: order::ActiveModel = order.into();
    active.razorpay_order_id = Set(Some(gateway_id.clone()));
    active.updated_at = Set(Utc::now());
    active.update(db).await?;

    Ok(reply(gateway_id))
}

/// Verifies a gateway payment and commits the paid transition.
///
/// Stock decrement, status, payment id, coupon usage, follow-up tasks and
/// (for cart orders) emptying the cart are one transaction. Follow-up tasks
/// are run by the caller after this returns.
#[instrument(skip(db, payments, input), fields(gateway_order_id = %input.razorpay_order_id))]
pub async fn verify_payment(
    db: &DatabaseConnection,
    payments: &dyn PaymentGateway,
    user_id: Uuid,
    input: VerifyPayment,
    settings: CheckoutSettings,
) -> Result<Verified, CheckoutError> {
    let found = order::Entity::find()
        .filter(order::Column::RazorpayOrderId.eq(input.razorpay_order_id.as_str()))
        .one(db)
        .await?;
    let order = owned_by(found, user_id)?;

    // Replays of a completed verification need a valid signature too.
    if !payments.verify_signature(
        &input.razorpay_order_id,
        &input.razorpay_payment_id,
        &input.razorpay_signature,
    ) {
        warn!(order_id = order.id, "Payment signature mismatch");
        return Err(CheckoutError::PaymentVerificationFailed);
    }

    if order.status != Status::PendingPayment {
        return replay_or_reject(order, &input.razorpay_payment_id);
    }

    let txn = db.begin().await?;

    // Only one verification may win the pending -> paid transition.
    let claimed = order::Entity::update_many()
        .col_expr(order::Column::Status, Expr::value(Status::Paid))
        .col_expr(
            order::Column::RazorpayPaymentId,
            Expr::value(input.razorpay_payment_id.clone()),
        )
        .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(order::Column::Id.eq(order.id))
        .filter(order::Column::Status.eq(Status::PendingPayment))
        .exec(&txn)
        .await?;

    if claimed.rows_affected == 0 {
        txn.rollback().await?;
        let current = order::Entity::find_by_id(order.id)
            .one(db)
            .await?
            .ok_or(CheckoutError::OrderNotFound)?;
        return replay_or_reject(current, &input.razorpay_payment_id);
    }

    let items = order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(order.id))
        .all(&txn)
        .await?;
    decrement_stock(&txn, &items).await?;

    if let Some(coupon_id) = order.coupon_id {
        coupons::record_usage(&txn, coupon_id, order.user_id, order.id).await?;
    }

    outbox::enqueue(&txn, order.id, TaskKind::AdminEmail, settings.outbox_max_attempts).await?;
    outbox::enqueue(
        &txn,
        order.id,
        TaskKind::CreateShipment,
        settings.outbox_max_attempts,
    )
    .await?;

    if order.checkout_source == CheckoutSource::Cart {
        cart::clear_cart(&txn, order.user_id).await?;
    }

    txn.commit().await?;

    let paid = order::Entity::find_by_id(order.id)
        .one(db)
        .await?
        .ok_or(CheckoutError::OrderNotFound)?;
    info!(order_id = paid.id, "Payment verified");

    Ok(Verified {
        order: paid,
        replay: false,
    })
}

fn replay_or_reject(order: order::Model, payment_id: &str) -> Result<Verified, CheckoutError> {
    if order.razorpay_payment_id.as_deref() == Some(payment_id) {
        return Ok(Verified {
            order,
            replay: true,
        });
    }
    Err(CheckoutError::InvalidOrderState(order.status))
}
