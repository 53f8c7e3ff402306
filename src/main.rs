use axum::{routing::get, Router};
use std::net::SocketAddr;

use toss_reconciler::api;
use toss_reconciler::config::Config;
use toss_reconciler::ledger;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = Config::from_env()?;

    // Log startup info
    tracing::info!("Starting Toss reconciler");
    tracing::info!("Environment: {}", config.server.environment);
    tracing::info!("Test mode: {}", config.toss.test_mode);
    tracing::info!(
        "Secret key configured: {}",
        config.toss.secret_key.is_some()
    );

    // Connect to the ledger database and verify it answers
    let pool_config = ledger::PoolConfig {
        max_connections: config.database.max_connections,
        ..ledger::PoolConfig::default()
    };
    let pool = ledger::init_pool(&config.database.url, Some(pool_config)).await?;
    ledger::health_check(&pool).await?;

    // Build router
    let app = Router::new()
        .route("/health", get(api::health::health_check))
        .with_state(config.clone());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
