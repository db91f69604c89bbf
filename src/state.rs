use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::Config;
use crate::identity::IdentityProvider;
use crate::notify::Notifier;
use crate::payments::PaymentGateway;
use crate::shipping::ShippingProvider;

/// Everything a handler needs, cloned cheaply into each request.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<Config>,
    pub identity: Arc<dyn IdentityProvider>,
    pub payments: Arc<dyn PaymentGateway>,
    pub shipping: Arc<dyn ShippingProvider>,
    pub notifier: Arc<dyn Notifier>,
}
