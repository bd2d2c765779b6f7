use anyhow::Result;
use callgenie_api::{build_app, ApiConfig};
use callgenie_observability::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("callgenie_api");

    let config = ApiConfig::from_env();
    let bind = config.bind.clone();
    let unknown_tier = config.unknown_tier;

    let app = build_app(config).await?;

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(bind = %bind, unknown_tier = ?unknown_tier, "callgenie policy api started");

    axum::serve(listener, app).await?;
    Ok(())
}
