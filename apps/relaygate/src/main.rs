mod bootstrap;
mod cli;
mod dsn;
mod providers;
mod traffic_sink;

use axum::Router;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let boot = bootstrap::bootstrap_from_env().await?;

    let app = Router::new()
        .merge(relaygate_router::gateway_router(boot.engine, None))
        .nest(
            "/api",
            relaygate_admin::admin_router(boot.storage, boot.snapshot, boot.config.admin_key_hash.clone()),
        );

    let bind = format!("{}:{}", boot.config.host, boot.config.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "relaygate listening");
    axum::serve(listener, app).await?;

    boot.sweeper.abort();
    Ok(())
}
