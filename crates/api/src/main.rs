//! Postwise API server

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tracing::info;

use postwise_api::{routes, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Postwise API");

    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await?;
    info!("Database pool created");

    sqlx::migrate!("../../migrations").run(&pool).await?;
    info!("Migrations applied");

    let port = config.port;
    let state = AppState::new(pool, config);
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port = port, "Listening");
    axum::serve(listener, app).await?;

    Ok(())
}
