//! Azara Storefront - catalog, carts and M-Pesa checkout

use std::sync::Arc;

use anyhow::Result;
use azara_storefront::api::{self, AppState};
use azara_storefront::config::AppConfig;
use azara_storefront::gateway::MpesaClient;
use azara_storefront::infrastructure::EventPublisher;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();

    let config = AppConfig::from_env()?;
    let db = PgPoolOptions::new().max_connections(10).connect(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&db).await?;
    let events = EventPublisher::connect(config.nats_url.as_deref()).await;
    let gateway = Arc::new(MpesaClient::new(config.mpesa.clone())?);
    let timeout = chrono::Duration::minutes(config.reservation_timeout_minutes);
    let state = AppState::new(db, gateway, events, timeout).with_internal_token(config.internal_token.clone());
    let app = api::router(state);

    tracing::info!("Azara storefront listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?, app).await?;
    Ok(())
}
