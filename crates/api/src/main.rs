use anyhow::Context;

use lotsync_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    lotsync_observability::init(config.log_format);

    let app = lotsync_api::app::build_app(&config).await?;

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        instance_id = %config.instance_id,
        "listening"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
