use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use super::{
    ShipmentCreated, ShipmentRequest, ShippingError, ShippingProvider, ShippingTokenCache,
};
use crate::config::ShiprocketConfig;

const API_BASE: &str = "https://apiv2.shiprocket.in";
pub const PROVIDER_NAME: &str = "shiprocket";

// Every parcel is booked with the same box.
const PARCEL_LENGTH_CM: u32 = 10;
const PARCEL_BREADTH_CM: u32 = 10;
const PARCEL_HEIGHT_CM: u32 = 5;
const PARCEL_WEIGHT_KG: f64 = 0.5;

pub struct ShiprocketClient {
    client: reqwest::Client,
    base_url: String,
    email: String,
    password: SecretString,
    pickup_location: String,
    tokens: Arc<ShippingTokenCache>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

impl ShiprocketClient {
    pub fn new(
        config: &ShiprocketConfig,
        tokens: Arc<ShippingTokenCache>,
    ) -> Result<Self, ShippingError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: API_BASE.to_owned(),
            email: config.email.clone(),
            password: config.password.clone(),
            pickup_location: config.pickup_location.clone(),
            tokens,
        })
    }

    #[instrument(skip(self), fields(email = %self.email))]
    async fn login(&self) -> Result<SecretString, ShippingError> {
        let response = self
            .client
            .post(format!("{}/v1/external/auth/login", self.base_url))
            .json(&LoginRequest {
                email: &self.email,
                password: self.password.expose_secret(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ShippingError::AuthenticationFailed(format!(
                "HTTP {status}: {text}"
            )));
        }

        let body: LoginResponse = response.json().await?;
        info!("Logged in to shipping provider");
        Ok(SecretString::from(body.token))
    }

    async fn post_order(
        &self,
        token: &SecretString,
        payload: &Value,
    ) -> Result<reqwest::Response, ShippingError> {
        Ok(self
            .client
            .post(format!("{}/v1/external/orders/create/adhoc", self.base_url))
            .bearer_auth(token.expose_secret())
            .json(payload)
            .send()
            .await?)
    }

    fn payload(&self, request: &ShipmentRequest) -> Value {
        let items: Vec<Value> = request
            .items
            .iter()
            .map(|item| {
                json!({
                    "name": item.name,
                    "sku": item.sku,
                    "units": item.units,
                    "selling_price": item.selling_price.to_string(),
                })
            })
            .collect();

        json!({
            "order_id": format!("SN-{}", request.order_id),
            "order_date": request.order_date,
            "pickup_location": self.pickup_location,
            "billing_customer_name": request.customer_name,
            "billing_last_name": "",
            "billing_address": request.address_line_1,
            "billing_address_2": request.address_line_2.clone().unwrap_or_default(),
            "billing_city": request.city,
            "billing_pincode": request.pincode,
            "billing_state": request.state,
            "billing_country": "India",
            "billing_email": request.customer_email,
            "billing_phone": request.customer_phone,
            "shipping_is_billing": true,
            "order_items": items,
            "payment_method": if request.cash_on_delivery { "COD" } else { "Prepaid" },
            "sub_total": request.sub_total.to_string(),
            "length": PARCEL_LENGTH_CM,
            "breadth": PARCEL_BREADTH_CM,
            "height": PARCEL_HEIGHT_CM,
            "weight": PARCEL_WEIGHT_KG,
        })
    }
}

#[async_trait]
impl ShippingProvider for ShiprocketClient {
    #[instrument(skip(self, request), fields(order_id = request.order_id))]
    async fn create_shipment(
        &self,
        request: &ShipmentRequest,
    ) -> Result<ShipmentCreated, ShippingError> {
        let payload = self.payload(request);

        let token = self.tokens.get_or_refresh(|| self.login()).await?;
        let mut response = self.post_order(&token, &payload).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("Shipping token rejected, logging in again");
            self.tokens.invalidate().await;
            let token = self.tokens.refresh(|| self.login()).await?;
            response = self.post_order(&token, &payload).await?;
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ShippingError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await?;
        parse_created(&body)
    }
}

/// Ids come back as numbers or strings depending on the endpoint version.
fn parse_created(body: &Value) -> Result<ShipmentCreated, ShippingError> {
    let id_field = |key: &str| match &body[key] {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    };

    let shipping_order_id = id_field("order_id")
        .ok_or_else(|| ShippingError::InvalidResponse(format!("missing order_id in {body}")))?;

    Ok(ShipmentCreated {
        provider: PROVIDER_NAME.to_owned(),
        shipping_order_id,
        shipment_id: id_field("shipment_id"),
    })
}
