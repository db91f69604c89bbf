//! Shipping-provider boundary.

pub mod shiprocket;
pub mod token_cache;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

pub use shiprocket::ShiprocketClient;
pub use token_cache::ShippingTokenCache;

#[derive(Debug, Error)]
pub enum ShippingError {
    #[error("Shipping provider authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Shipping provider rejected the shipment: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("Unexpected shipping provider response: {0}")]
    InvalidResponse(String),
    #[error("Shipping provider unreachable: {0}")]
    Http(#[from] reqwest::Error),
}

/// Everything the provider needs to book a parcel for one order.
#[derive(Clone, Debug, Serialize)]
pub struct ShipmentRequest {
    pub order_id: i32,
    pub order_date: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub address_line_1: String,
    pub address_line_2: Option<String>,
    pub city: String,
    pub state: String,
    pub pincode: String,
    pub cash_on_delivery: bool,
    pub sub_total: Decimal,
    pub items: Vec<ShipmentItem>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ShipmentItem {
    pub name: String,
    pub sku: String,
    pub units: i32,
    pub selling_price: Decimal,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShipmentCreated {
    pub provider: String,
    pub shipping_order_id: String,
    pub shipment_id: Option<String>,
}

#[async_trait]
pub trait ShippingProvider: Send + Sync {
    async fn create_shipment(
        &self,
        request: &ShipmentRequest,
    ) -> Result<ShipmentCreated, ShippingError>;
}
