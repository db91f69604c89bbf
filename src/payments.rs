//! Razorpay-style payment gateway.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::{info, instrument};

use crate::config::RazorpayConfig;

const API_BASE: &str = "https://api.razorpay.com/v1";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Payment gateway rejected the request: HTTP {status}: {body}")]
    Gateway { status: u16, body: String },
    #[error("Payment gateway unreachable: {0}")]
    Http(#[from] reqwest::Error),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Public key handed to the browser checkout widget.
    fn key_id(&self) -> &str;

    fn currency(&self) -> &str;

    /// Creates a gateway-side order and returns its id.
    async fn create_order(&self, amount_minor: i64, receipt: &str) -> Result<String, PaymentError>;

    fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool;
}

pub struct RazorpayClient {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: SecretString,
    currency: String,
}

#[derive(Serialize)]
struct CreateOrderRequest<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
}

#[derive(Deserialize)]
struct CreateOrderResponse {
    id: String,
}

impl RazorpayClient {
    pub fn new(config: &RazorpayConfig) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .build()?;

        Ok(Self {
            client,
            base_url: API_BASE.to_owned(),
            key_id: config.key_id.clone(),
            key_secret: config.key_secret.clone(),
            currency: config.currency.clone(),
        })
    }
}

#[async_trait]
impl PaymentGateway for RazorpayClient {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn currency(&self) -> &str {
        &self.currency
    }

    #[instrument(skip(self))]
    async fn create_order(&self, amount_minor: i64, receipt: &str) -> Result<String, PaymentError> {
        let response = self
            .client
            .post(format!("{}/orders", self.base_url))
            .basic_auth(&self.key_id, Some(self.key_secret.expose_secret()))
            .json(&CreateOrderRequest {
                amount: amount_minor,
                currency: &self.currency,
                receipt,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::Gateway {
                status: status.as_u16(),
                body,
            });
        }

        let order: CreateOrderResponse = response.json().await?;
        info!(gateway_order_id = %order.id, "Created gateway order");
        Ok(order.id)
    }

    fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        verify_signature(
            self.key_secret.expose_secret(),
            order_id,
            payment_id,
            signature,
        )
    }
}

fn payment_mac(secret: &str, order_id: &str, payment_id: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(format!("{order_id}|{payment_id}").as_bytes());
    Some(mac)
}

/// hex(HMAC-SHA256(secret, "order_id|payment_id")), compared in constant time.
pub fn verify_signature(secret: &str, order_id: &str, payment_id: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };

    payment_mac(secret, order_id, payment_id)
        .is_some_and(|mac| mac.verify_slice(&expected).is_ok())
}

/// Produces the signature the gateway would send for a payment.
pub fn sign(secret: &str, order_id: &str, payment_id: &str) -> String {
    payment_mac(secret, order_id, payment_id)
        .map(|mac| hex::encode(mac.finalize().into_bytes()))
        .unwrap_or_default()
}
