use std::net::SocketAddr;
use std::sync::Arc;

use sea_orm::Database;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sniipe_store::config::Config;
use sniipe_store::create_app;
use sniipe_store::entities::setup_schema;
use sniipe_store::identity::SupabaseIdentity;
use sniipe_store::notify::SmtpNotifier;
use sniipe_store::payments::RazorpayClient;
use sniipe_store::services::outbox::spawn_dispatcher;
use sniipe_store::shipping::{ShiprocketClient, ShippingTokenCache};
use sniipe_store::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    let db = Database::connect(&config.database_url).await?;
    setup_schema(&db).await?;

    let tokens = Arc::new(ShippingTokenCache::default());
    let state = AppState {
        db: Arc::new(db),
        identity: Arc::new(SupabaseIdentity::new(&config.identity)?),
        payments: Arc::new(RazorpayClient::new(&config.razorpay)?),
        shipping: Arc::new(ShiprocketClient::new(&config.shiprocket, tokens)?),
        notifier: Arc::new(SmtpNotifier::new(config.smtp.as_ref())?),
        config: Arc::new(config),
    };

    spawn_dispatcher(state.clone(), state.config.outbox.interval_secs);

    let addr = SocketAddr::new(state.config.host, state.config.port);
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
