#![allow(dead_code)]

use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use secrecy::SecretString;
use serde_json::{json, Value};
use uuid::Uuid;

use sniipe_store::config::{
    CheckoutConfig, Config, IdentityConfig, OutboxConfig, RazorpayConfig, ShiprocketConfig,
    UploadConfig,
};
use sniipe_store::create_app;
use sniipe_store::entities::coupon::{self, CouponKind};
use sniipe_store::entities::{product, setup_schema, user, variant};
use sniipe_store::identity::{
    ensure_user, IdentityError, IdentityProvider, IdentitySession, IdentityUser,
};
use sniipe_store::notify::{Delivery, Notifier, NotifyError, OrderEmail};
use sniipe_store::payments::{self, PaymentError, PaymentGateway};
use sniipe_store::services::addresses::{self, AddressInput};
use sniipe_store::shipping::{ShipmentCreated, ShipmentRequest, ShippingError, ShippingProvider};
use sniipe_store::state::AppState;

pub const ADMIN_EMAIL: &str = "admin@shop.in";
pub const GATEWAY_SECRET: &str = "test_gateway_secret";
pub const FILE_SIZE_LIMIT: usize = 1024;

struct Account {
    password: String,
    user: IdentityUser,
}

/// Identity provider backed by an in-memory account list. A user's token is
/// `token-<id>`.
#[derive(Default)]
pub struct FakeIdentity {
    accounts: Mutex<Vec<Account>>,
}

impl FakeIdentity {
    pub fn add(&self, email: &str, password: &str, confirmed: bool) -> IdentityUser {
        let user = IdentityUser {
            id: Uuid::new_v4(),
            email: email.to_owned(),
            email_confirmed: confirmed,
        };
        self.accounts.lock().unwrap().push(Account {
            password: password.to_owned(),
            user: user.clone(),
        });
        user
    }
}

pub fn token_for(user: &IdentityUser) -> String {
    format!("token-{}", user.id)
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn get_user(&self, token: &str) -> Result<IdentityUser, IdentityError> {
        let id = token
            .strip_prefix("token-")
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or(IdentityError::InvalidToken)?;

        self.accounts
            .lock()
            .unwrap()
            .iter()
            .find(|account| account.user.id == id)
            .map(|account| account.user.clone())
            .ok_or(IdentityError::InvalidToken)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<IdentitySession, IdentityError> {
        self.accounts
            .lock()
            .unwrap()
            .iter()
            .find(|account| account.user.email == email && account.password == password)
            .map(|account| IdentitySession {
                access_token: token_for(&account.user),
                user: account.user.clone(),
            })
            .ok_or(IdentityError::InvalidCredentials)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<IdentityUser, IdentityError> {
        let exists = self
            .accounts
            .lock()
            .unwrap()
            .iter()
            .any(|account| account.user.email == email);
        if exists {
            return Err(IdentityError::AlreadyRegistered);
        }
        Ok(self.add(email, password, false))
    }
}

#[derive(Default)]
pub struct FakeGateway {
    orders: AtomicUsize,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn key_id(&self) -> &str {
        "rzp_test"
    }

    fn currency(&self) -> &str {
        "INR"
    }

    async fn create_order(&self, _amount_minor: i64, _receipt: &str) -> Result<String, PaymentError> {
        let n = self.orders.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("order_rzp_{n}"))
    }

    fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        payments::verify_signature(GATEWAY_SECRET, order_id, payment_id, signature)
    }
}

#[derive(Default)]
pub struct FakeShipping {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

#[async_trait]
impl ShippingProvider for FakeShipping {
    async fn create_shipment(
        &self,
        request: &ShipmentRequest,
    ) -> Result<ShipmentCreated, ShippingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ShippingError::Rejected {
                status: 503,
                body: "unavailable".to_owned(),
            });
        }

        Ok(ShipmentCreated {
            provider: "fake".to_owned(),
            shipping_order_id: format!("SHIP-{}", request.order_id),
            shipment_id: Some(format!("SHPM-{}", request.order_id)),
        })
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    pub sent: AtomicUsize,
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn order_paid(&self, _email: &OrderEmail) -> Result<Delivery, NotifyError> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(Delivery::Sent)
    }
}

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub db: Arc<DatabaseConnection>,
    pub identity: Arc<FakeIdentity>,
    pub shipping: Arc<FakeShipping>,
    pub notifier: Arc<FakeNotifier>,
    pub upload_dir: PathBuf,
}

fn test_config(database_url: String, upload_dir: &PathBuf) -> Config {
    Config {
        database_url,
        host: IpAddr::from([127, 0, 0, 1]),
        port: 0,
        admin_emails: vec![ADMIN_EMAIL.to_owned()],
        identity: IdentityConfig {
            url: "http://identity.invalid".to_owned(),
            api_key: SecretString::from("anon".to_owned()),
            jwt_secret: SecretString::from("jwt".to_owned()),
        },
        razorpay: RazorpayConfig {
            key_id: "rzp_test".to_owned(),
            key_secret: SecretString::from(GATEWAY_SECRET.to_owned()),
            currency: "INR".to_owned(),
        },
        shiprocket: ShiprocketConfig {
            email: "ops@shop.in".to_owned(),
            password: SecretString::from("secret".to_owned()),
            pickup_location: "Primary".to_owned(),
        },
        smtp: None,
        checkout: CheckoutConfig {
            stale_order_minutes: 30,
        },
        outbox: OutboxConfig {
            max_attempts: 3,
            interval_secs: 3600,
        },
        uploads: UploadConfig {
            dir: upload_dir.display().to_string(),
            file_size_limit: FILE_SIZE_LIMIT,
        },
    }
}

pub async fn spawn_app() -> TestApp {
    let root = std::env::temp_dir().join(format!("sniipe-test-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&root).expect("Failed to create test dir");
    let upload_dir = root.join("uploads");

    let database_url = format!("sqlite://{}?mode=rwc", root.join("test.db").display());
    let db = Database::connect(&database_url)
        .await
        .expect("Failed to connect to sqlite");
    setup_schema(&db).await.expect("Failed to create schema");
    let db = Arc::new(db);

    let identity = Arc::new(FakeIdentity::default());
    let shipping = Arc::new(FakeShipping::default());
    let notifier = Arc::new(FakeNotifier::default());

    let state = AppState {
        db: db.clone(),
        config: Arc::new(test_config(database_url, &upload_dir)),
        identity: identity.clone(),
        payments: Arc::new(FakeGateway::default()),
        shipping: shipping.clone(),
        notifier: notifier.clone(),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let address = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, create_app(state)).await.unwrap();
    });

    TestApp {
        address,
        client: reqwest::Client::new(),
        db,
        identity,
        shipping,
        notifier,
        upload_dir,
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    /// A confirmed account, already mirrored locally. Returns its bearer token.
    pub async fn user(&self, email: &str) -> (user::Model, String) {
        let identity = self.identity.add(email, "password123", true);
        let user = ensure_user(self.db.as_ref(), &identity, Some("Test User".to_owned()))
            .await
            .expect("Failed to create user");
        (user, token_for(&identity))
    }

    pub async fn admin(&self) -> String {
        self.user(ADMIN_EMAIL).await.1
    }

    pub async fn get(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("Failed to send request")
    }

    pub async fn post(&self, path: &str, token: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .expect("Failed to send request")
    }

    pub async fn put(&self, path: &str, token: &str, body: Value) -> reqwest::Response {
        self.client
            .put(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .expect("Failed to send request")
    }

    pub async fn patch(&self, path: &str, token: &str, body: Value) -> reqwest::Response {
        self.client
            .patch(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .expect("Failed to send request")
    }

    pub async fn delete(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .delete(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("Failed to send request")
    }

    pub fn shipments(&self) -> usize {
        self.shipping.calls.load(Ordering::SeqCst)
    }

    pub fn emails(&self) -> usize {
        self.notifier.sent.load(Ordering::SeqCst)
    }

    pub async fn product(&self, name: &str, price: i64, category: Option<&str>) -> product::Model {
        product::ActiveModel {
            name: Set(name.to_owned()),
            description: Set(Some(format!("{name} description"))),
            price: Set(Decimal::from(price)),
            category: Set(category.map(str::to_owned)),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .expect("Failed to seed product")
    }

    pub async fn variant(&self, product_id: i32, color: &str, size: &str, stock: i32) -> variant::Model {
        variant::ActiveModel {
            product_id: Set(product_id),
            color: Set(color.to_owned()),
            size: Set(size.to_owned()),
            stock: Set(stock),
            price_override: Set(None),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .expect("Failed to seed variant")
    }

    pub async fn address(&self, user_id: Uuid) -> i32 {
        addresses::create(
            self.db.as_ref(),
            user_id,
            AddressInput {
                label: Some("Home".to_owned()),
                full_name: "Asha Rao".to_owned(),
                phone: "9876543210".to_owned(),
                address_line_1: "12 MG Road".to_owned(),
                address_line_2: None,
                city: "Bengaluru".to_owned(),
                state: "Karnataka".to_owned(),
                pincode: "560001".to_owned(),
                is_default: false,
            },
        )
        .await
        .expect("Failed to seed address")
        .id
    }

    pub async fn coupon(&self, code: &str, kind: CouponKind, value: i64) -> coupon::Model {
        coupon::ActiveModel {
            code: Set(code.to_owned()),
            kind: Set(kind),
            value: Set(Decimal::from(value)),
            active: Set(true),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .expect("Failed to seed coupon")
    }

    pub async fn stock(&self, variant_id: i32) -> i32 {
        use sea_orm::EntityTrait;

        variant::Entity::find_by_id(variant_id)
            .one(self.db.as_ref())
            .await
            .unwrap()
            .expect("Variant not found")
            .stock
    }
}

pub async fn json(response: reqwest::Response, expected: StatusCode) -> Value {
    let status = response.status();
    let body = response.json::<Value>().await.unwrap_or(json!(null));
    assert_eq!(status, expected, "unexpected status, body: {body}");
    body
}

/// Decimals are serialized as strings.
pub fn decimal(value: &Value) -> Decimal {
    Decimal::from_str(value.as_str().expect("Decimal is not a string")).unwrap()
}
