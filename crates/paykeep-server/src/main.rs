mod auth;
mod config;
mod error;
mod reconcile;
mod routes;

use std::sync::Arc;

use config::AppConfig;
use reconcile::ReconcileStore;
use routes::{app_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("paykeep_server=info".parse().expect("valid directive")),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting paykeep-server with config: {:?}", config);

    let store = ReconcileStore::open(&config.database_path)?;
    let state = AppState::new(config, store);
    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("paykeep-server listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
