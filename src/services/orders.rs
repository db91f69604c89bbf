//! Order tracking, shipments and the admin order view.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::{
    order::{self, PaymentMethod, Status},
    order_item, product, user, variant,
};
use crate::error::ApiError;
use crate::notify::{OrderEmail, OrderEmailItem};
use crate::shipping::{ShipmentItem, ShipmentRequest, ShippingError, ShippingProvider};

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Order not found")]
    NotFound,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Cannot ship an order that is {0:?}")]
    NotShippable(Status),
    #[error("Cannot move order from {from:?} to {to:?}")]
    InvalidTransition { from: Status, to: Status },
    #[error(transparent)]
    Shipping(#[from] ShippingError),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::NotFound => ApiError::NotFound(err.to_string()),
            OrderError::Unauthorized => ApiError::Forbidden(err.to_string()),
            OrderError::NotShippable(_) | OrderError::InvalidTransition { .. } => {
                ApiError::Conflict(err.to_string())
            }
            OrderError::Shipping(err) => ApiError::Internal(err.to_string()),
            OrderError::Database(err) => err.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderItemView {
    pub id: i32,
    pub product_id: i32,
    pub product_name: String,
    pub variant_id: Option<i32>,
    pub color: Option<String>,
    pub size: Option<String>,
    pub quantity: i32,
    pub price: Decimal,
    pub subtotal: Decimal,
}

#[derive(Debug, Serialize)]
pub struct ShippingAddressView {
    pub name: String,
    pub phone: String,
    pub address_line_1: String,
    pub address_line_2: Option<String>,
    pub city: String,
    pub state: String,
    pub pincode: String,
}

#[derive(Debug, Serialize)]
pub struct OrderView {
    pub id: i32,
    pub user_id: Uuid,
    pub status: Status,
    pub status_label: &'static str,
    pub total_amount: Decimal,
    pub discount_amount: Decimal,
    pub payable_amount: Decimal,
    pub payment_method: PaymentMethod,
    pub shipping_address: ShippingAddressView,
    pub shipping_provider: Option<String>,
    pub shipping_order_id: Option<String>,
    pub shipment_id: Option<String>,
    pub awb_code: Option<String>,
    pub courier_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItemView>,
}

impl OrderView {
    fn new(order: order::Model, items: Vec<OrderItemView>) -> Self {
        OrderView {
            status_label: order.status.label(),
            payable_amount: order.payable_amount(),
            total_amount: order.total_amount.round_dp(2),
            discount_amount: order.discount_amount.round_dp(2),
            id: order.id,
            user_id: order.user_id,
            status: order.status,
            payment_method: order.payment_method,
            shipping_address: ShippingAddressView {
                name: order.shipping_name,
                phone: order.shipping_phone,
                address_line_1: order.shipping_address_line_1,
                address_line_2: order.shipping_address_line_2,
                city: order.shipping_city,
                state: order.shipping_state,
                pincode: order.shipping_pincode,
            },
            shipping_provider: order.shipping_provider,
            shipping_order_id: order.shipping_order_id,
            shipment_id: order.shipment_id,
            awb_code: order.awb_code,
            courier_name: order.courier_name,
            created_at: order.created_at,
            items,
        }
    }
}

/// Items of the given orders, joined with product and variant, keyed by order.
async fn items_for<C: ConnectionTrait>(
    db: &C,
    order_ids: Vec<i32>,
) -> Result<HashMap<i32, Vec<OrderItemView>>, DbErr> {
    let mut grouped: HashMap<i32, Vec<OrderItemView>> = HashMap::new();
    if order_ids.is_empty() {
        return Ok(grouped);
    }

    let rows = order_item::Entity::find()
        .filter(order_item::Column::OrderId.is_in(order_ids))
        .order_by_asc(order_item::Column::Id)
        .find_also_related(product::Entity)
        .all(db)
        .await?;

    let variant_ids: Vec<i32> = rows.iter().filter_map(|(item, _)| item.variant_id).collect();
    let variants: HashMap<i32, variant::Model> = if variant_ids.is_empty() {
        HashMap::new()
    } else {
        variant::Entity::find()
            .filter(variant::Column::Id.is_in(variant_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|v| (v.id, v))
            .collect()
    };

    for (item, product) in rows {
        let variant = item.variant_id.and_then(|id| variants.get(&id));
        grouped.entry(item.order_id).or_default().push(OrderItemView {
            id: item.id,
            product_id: item.product_id,
            product_name: product.map(|p| p.name).unwrap_or_default(),
            variant_id: item.variant_id,
            color: variant.map(|v| v.color.clone()),
            size: variant.map(|v| v.size.clone()),
            quantity: item.quantity,
            price: item.price_at_time.round_dp(2),
            subtotal: item.subtotal.round_dp(2),
        });
    }

    Ok(grouped)
}

async fn views<C: ConnectionTrait>(
    db: &C,
    orders: Vec<order::Model>,
) -> Result<Vec<OrderView>, DbErr> {
    let mut items = items_for(db, orders.iter().map(|o| o.id).collect()).await?;
    Ok(orders
        .into_iter()
        .map(|order| {
            let lines = items.remove(&order.id).unwrap_or_default();
            OrderView::new(order, lines)
        })
        .collect())
}

pub async fn list_for_user<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
) -> Result<Vec<OrderView>, DbErr> {
    let orders = order::Entity::find()
        .filter(order::Column::UserId.eq(user_id))
        .order_by_desc(order::Column::CreatedAt)
        .order_by_desc(order::Column::Id)
        .all(db)
        .await?;
    views(db, orders).await
}

pub async fn list_all<C: ConnectionTrait>(
    db: &C,
    status: Option<Status>,
) -> Result<Vec<OrderView>, DbErr> {
    let mut query = order::Entity::find()
        .order_by_desc(order::Column::CreatedAt)
        .order_by_desc(order::Column::Id);
    if let Some(status) = status {
        query = query.filter(order::Column::Status.eq(status));
    }
    views(db, query.all(db).await?).await
}

/// One order. `owner` restricts the lookup to that user's orders.
pub async fn get<C: ConnectionTrait>(
    db: &C,
    order_id: i32,
    owner: Option<Uuid>,
) -> Result<OrderView, OrderError> {
    let order = order::Entity::find_by_id(order_id)
        .one(db)
        .await?
        .ok_or(OrderError::NotFound)?;

    if let Some(user_id) = owner {
        if order.user_id != user_id {
            return Err(OrderError::Unauthorized);
        }
    }

    let mut items = items_for(db, vec![order.id]).await?;
    let lines = items.remove(&order.id).unwrap_or_default();
    Ok(OrderView::new(order, lines))
}

#[derive(Debug, Default)]
pub struct AdminOrderUpdate {
    pub status: Option<Status>,
    pub awb_code: Option<String>,
    pub courier_name: Option<String>,
}

/// Admin edits. Status may only move forward along the order state machine.
pub async fn admin_update<C: ConnectionTrait>(
    db: &C,
    order_id: i32,
    update: AdminOrderUpdate,
) -> Result<OrderView, OrderError> {
    let order = order::Entity::find_by_id(order_id)
        .one(db)
        .await?
        .ok_or(OrderError::NotFound)?;

    let mut query = order::Entity::update_many()
        .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(order::Column::Id.eq(order.id));

    if let Some(next) = update.status.filter(|next| *next != order.status) {
        if !order.status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                to: next,
            });
        }
        query = query.col_expr(order::Column::Status, Expr::value(next));
    }
    if let Some(awb) = update.awb_code {
        query = query.col_expr(order::Column::AwbCode, Expr::value(awb));
    }
    if let Some(courier) = update.courier_name {
        query = query.col_expr(order::Column::CourierName, Expr::value(courier));
    }
    query.exec(db).await?;

    get(db, order_id, None).await
}

#[derive(Debug)]
pub enum ShipmentOutcome {
    Created(order::Model),
    /// The order already carried a shipping order id; nothing was sent.
    AlreadyCreated(order::Model),
}

async fn shipment_request<C: ConnectionTrait>(
    db: &C,
    order: &order::Model,
) -> Result<ShipmentRequest, DbErr> {
    let customer_email = user::Entity::find_by_id(order.user_id)
        .one(db)
        .await?
        .map(|u| u.email)
        .unwrap_or_default();

    let mut items = items_for(db, vec![order.id]).await?;
    let items = items
        .remove(&order.id)
        .unwrap_or_default()
        .into_iter()
        .map(|item| ShipmentItem {
            sku: match item.variant_id {
                Some(variant_id) => format!("SN-{}-{variant_id}", item.product_id),
                None => format!("SN-{}", item.product_id),
            },
            name: match (&item.color, &item.size) {
                (Some(color), Some(size)) => format!("{} ({color}/{size})", item.product_name),
                _ => item.product_name,
            },
            units: item.quantity,
            selling_price: item.price,
        })
        .collect();

    Ok(ShipmentRequest {
        order_id: order.id,
        order_date: order.created_at.format("%Y-%m-%d %H:%M").to_string(),
        customer_name: order.shipping_name.clone(),
        customer_email,
        customer_phone: order.shipping_phone.clone(),
        address_line_1: order.shipping_address_line_1.clone(),
        address_line_2: order.shipping_address_line_2.clone(),
        city: order.shipping_city.clone(),
        state: order.shipping_state.clone(),
        pincode: order.shipping_pincode.clone(),
        cash_on_delivery: order.payment_method == PaymentMethod::Cod,
        sub_total: order.payable_amount(),
        items,
    })
}

/// Books a shipment for a paid (or direct) order. A no-op when the order
/// already has a shipping order id, so retries never create a second one.
pub async fn create_shipment<C: ConnectionTrait>(
    db: &C,
    shipping: &dyn ShippingProvider,
    order_id: i32,
) -> Result<ShipmentOutcome, OrderError> {
    let order = order::Entity::find_by_id(order_id)
        .one(db)
        .await?
        .ok_or(OrderError::NotFound)?;

    if order.shipping_order_id.is_some() {
        return Ok(ShipmentOutcome::AlreadyCreated(order));
    }
    if !order.status.is_shippable() {
        return Err(OrderError::NotShippable(order.status));
    }

    let request = shipment_request(db, &order).await?;
    let created = shipping.create_shipment(&request).await?;

    let stored = order::Entity::update_many()
        .col_expr(order::Column::Status, Expr::value(Status::ShippingCreated))
        .col_expr(
            order::Column::ShippingProvider,
            Expr::value(created.provider.clone()),
        )
        .col_expr(
            order::Column::ShippingOrderId,
            Expr::value(created.shipping_order_id.clone()),
        )
        .col_expr(order::Column::ShipmentId, Expr::value(created.shipment_id.clone()))
        .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(order::Column::Id.eq(order.id))
        .filter(order::Column::ShippingOrderId.is_null())
        .exec(db)
        .await?;

    let updated = order::Entity::find_by_id(order.id)
        .one(db)
        .await?
        .ok_or(OrderError::NotFound)?;

    if stored.rows_affected == 0 {
        warn!(
            order_id,
            provider_order_id = %created.shipping_order_id,
            "Shipment created concurrently, keeping the first one"
        );
        return Ok(ShipmentOutcome::AlreadyCreated(updated));
    }

    info!(
        order_id,
        shipping_order_id = %created.shipping_order_id,
        "Shipment created"
    );
    Ok(ShipmentOutcome::Created(updated))
}

pub async fn order_email<C: ConnectionTrait>(db: &C, order_id: i32) -> Result<OrderEmail, OrderError> {
    let view = get(db, order_id, None).await?;
    let customer_email = user::Entity::find_by_id(view.user_id)
        .one(db)
        .await?
        .map(|u| u.email)
        .unwrap_or_default();

    Ok(OrderEmail {
        order_id: view.id,
        total_amount: view.total_amount,
        discount_amount: view.discount_amount,
        payable_amount: view.payable_amount,
        payment_method: format!("{:?}", view.payment_method).to_lowercase(),
        customer_email,
        shipping_name: view.shipping_address.name,
        shipping_phone: view.shipping_address.phone,
        address_line_1: view.shipping_address.address_line_1,
        address_line_2: view.shipping_address.address_line_2,
        city: view.shipping_address.city,
        state: view.shipping_address.state,
        pincode: view.shipping_address.pincode,
        items: view
            .items
            .into_iter()
            .map(|item| OrderEmailItem {
                product_name: item.product_name,
                color: item.color,
                size: item.size,
                quantity: item.quantity,
                price: item.price,
            })
            .collect(),
    })
}

/// Flat export row: one per order item.
#[derive(Debug, Serialize)]
pub struct ExportRow {
    pub order_id: i32,
    pub created_at: DateTime<Utc>,
    pub status: Status,
    pub payment_method: PaymentMethod,
    pub customer_email: String,
    pub shipping_name: String,
    pub shipping_phone: String,
    pub shipping_city: String,
    pub shipping_state: String,
    pub shipping_pincode: String,
    pub product_name: String,
    pub color: Option<String>,
    pub size: Option<String>,
    pub quantity: i32,
    pub price: Decimal,
    pub subtotal: Decimal,
    pub order_total: Decimal,
    pub awb_code: Option<String>,
}

pub async fn export_rows<C: ConnectionTrait>(db: &C) -> Result<Vec<ExportRow>, DbErr> {
    let orders = list_all(db, None).await?;
    let emails: HashMap<Uuid, String> = user::Entity::find()
        .all(db)
        .await?
        .into_iter()
        .map(|u| (u.id, u.email))
        .collect();

    let mut rows = Vec::new();
    for order in orders {
        let customer_email = emails.get(&order.user_id).cloned().unwrap_or_default();
        for item in order.items {
            rows.push(ExportRow {
                order_id: order.id,
                created_at: order.created_at,
                status: order.status,
                payment_method: order.payment_method,
                customer_email: customer_email.clone(),
                shipping_name: order.shipping_address.name.clone(),
                shipping_phone: order.shipping_address.phone.clone(),
                shipping_city: order.shipping_address.city.clone(),
                shipping_state: order.shipping_address.state.clone(),
                shipping_pincode: order.shipping_address.pincode.clone(),
                product_name: item.product_name,
                color: item.color,
                size: item.size,
                quantity: item.quantity,
                price: item.price,
                subtotal: item.subtotal,
                order_total: order.total_amount,
                awb_code: order.awb_code.clone(),
            });
        }
    }
    Ok(rows)
}
