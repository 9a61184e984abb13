mod auth;
mod config;
mod error;
mod rate_limit;
mod routes;

use std::sync::Arc;

use studysync_core::SyncService;

use config::AppConfig;
use routes::{app_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("studysync_api=info".parse()?)
                .add_directive("studysync_core=info".parse()?),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting studysync-api with config: {:?}", config);

    let service = SyncService::open_path(&config.db_path, config.sync_policy()).await?;
    let state = AppState::new(config, service);
    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("studysync-api listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
