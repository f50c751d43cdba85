use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use patrimo_core::SystemClock;
use patrimo_server::{create_router, AppState, Config};

const DEFAULT_LOG_FILTER: &str = "patrimo=info,tower_http=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let config = Config::load().context("Failed to load configuration")?;

    let pool = patrimo_storage::create_db(&config.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_url))?;

    let state = AppState::from_pool(&config, pool, Arc::new(SystemClock))
        .context("Failed to initialize application state")?;
    let app = create_router(Arc::new(state), &config);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    Ok(())
}
