//! Admin notification email.

use std::fmt::Write as _;

use async_trait::async_trait;
use lettre::{
    message::header::ContentType,
    transport::smtp::{authentication::Credentials, Error as SmtpError},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::SmtpConfig;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),
    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),
}

#[derive(Clone, Debug)]
pub struct OrderEmail {
    pub order_id: i32,
    pub total_amount: Decimal,
    pub discount_amount: Decimal,
    pub payable_amount: Decimal,
    pub payment_method: String,
    pub customer_email: String,
    pub shipping_name: String,
    pub shipping_phone: String,
    pub address_line_1: String,
    pub address_line_2: Option<String>,
    pub city: String,
    pub state: String,
    pub pincode: String,
    pub items: Vec<OrderEmailItem>,
}

#[derive(Clone, Debug)]
pub struct OrderEmailItem {
    pub product_name: String,
    pub color: Option<String>,
    pub size: Option<String>,
    pub quantity: i32,
    pub price: Decimal,
}

impl OrderEmail {
    pub fn subject(&self) -> String {
        format!("New Order Paid | SN-{}", self.order_id)
    }

    pub fn body(&self) -> String {
        let mut body = String::new();

        let _ = writeln!(body, "New order received ({}).", self.payment_method);
        let _ = writeln!(body);
        let _ = writeln!(body, "Order ID: SN-{}", self.order_id);
        let _ = writeln!(body, "Total Amount: ₹{}", self.total_amount);
        if self.discount_amount > Decimal::ZERO {
            let _ = writeln!(body, "Discount: ₹{}", self.discount_amount);
            let _ = writeln!(body, "Payable: ₹{}", self.payable_amount);
        }
        let _ = writeln!(body);
        let _ = writeln!(body, "Customer:");
        let _ = writeln!(body, "Email: {}", self.customer_email);
        let _ = writeln!(body, "Phone: {}", self.shipping_phone);
        let _ = writeln!(body);
        let _ = writeln!(body, "Shipping Address:");
        let _ = writeln!(body, "{}", self.shipping_name);
        let _ = writeln!(body, "{}", self.address_line_1);
        if let Some(line) = self.address_line_2.as_deref().filter(|l| !l.is_empty()) {
            let _ = writeln!(body, "{line}");
        }
        let _ = writeln!(body, "{}, {} - {}", self.city, self.state, self.pincode);
        let _ = writeln!(body);
        let _ = writeln!(body, "Items:");
        for item in &self.items {
            let _ = writeln!(body, "- {}", item.product_name);
            let _ = writeln!(body, "  Color: {}", item.color.as_deref().unwrap_or("-"));
            let _ = writeln!(body, "  Size: {}", item.size.as_deref().unwrap_or("-"));
            let _ = writeln!(body, "  Qty: {}", item.quantity);
            let _ = writeln!(body, "  Price: ₹{}", item.price);
        }
        let _ = writeln!(body);
        body.push_str("Login to the admin panel for details.");

        body
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// No SMTP configuration; nothing was attempted.
    Disabled,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn order_paid(&self, email: &OrderEmail) -> Result<Delivery, NotifyError>;
}

pub struct SmtpNotifier {
    mailer: Option<(AsyncSmtpTransport<Tokio1Executor>, SmtpConfig)>,
}

impl SmtpNotifier {
    pub fn new(config: Option<&SmtpConfig>) -> Result<Self, NotifyError> {
        let Some(config) = config else {
            warn!("SMTP is not configured, admin order emails are disabled");
            return Ok(Self { mailer: None });
        };

        let credentials = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_owned(),
        );
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            .port(config.port)
            .credentials(credentials)
            .build();

        Ok(Self {
            mailer: Some((mailer, config.clone())),
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn order_paid(&self, email: &OrderEmail) -> Result<Delivery, NotifyError> {
        let Some((mailer, config)) = &self.mailer else {
            return Ok(Delivery::Disabled);
        };

        let message = Message::builder()
            .from(
                config
                    .username
                    .parse()
                    .map_err(|_| NotifyError::InvalidAddress(config.username.clone()))?,
            )
            .to(config
                .admin_email
                .parse()
                .map_err(|_| NotifyError::InvalidAddress(config.admin_email.clone()))?)
            .subject(email.subject())
            .header(ContentType::TEXT_PLAIN)
            .body(email.body())?;

        mailer.send(message).await?;
        info!(order_id = email.order_id, "Admin notified of order");
        Ok(Delivery::Sent)
    }
}
