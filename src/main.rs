use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use storefront_payments::api::{self, AppState};
use storefront_payments::config::Config;
use storefront_payments::orders::PgOrderStore;
use storefront_payments::payments::PaymentManager;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storefront_payments=info,tower_http=info".into()),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;

    tracing::info!("Starting storefront payments service");
    tracing::info!("Environment: {}", config.server.environment);

    // Order store
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    let store = Arc::new(PgOrderStore::new(pool));

    // Provider registry; initialization failures degrade, never abort
    let manager = Arc::new(PaymentManager::initialize(config.payments.clone(), store).await);

    let state = AppState {
        manager,
        environment: config.server.environment.clone(),
    };
    let app = api::router(state).layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
