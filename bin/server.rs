// Credit Platform - Web Server
// REST API with Axum

use anyhow::{Context, Result};
use credit_platform::api::{router, AppState};
use credit_platform::{open_database, Config};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    let config = Config::from_env()?;

    let conn = open_database(&config.db_path)
        .with_context(|| format!("failed to open database {}", config.db_path))?;
    info!(db = %config.db_path, "database opened (WAL)");

    let state = AppState::sqlite(conn, config.import_chunk_size);
    let app = router(state, &config)?;

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!(%addr, cors_origin = %config.cors_origin, "🚀 credit-server listening");

    axum::serve(listener, app)
        .await
        .context("server terminated")?;

    Ok(())
}
