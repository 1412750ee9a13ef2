use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info};

use lure_api::app::{AppServices, ConsumerTask, build_app, build_services, serve};
use lure_infra::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lure_observability::init();

    let config = Config::from_env().context("invalid configuration")?;
    let services = Arc::new(
        build_services(&config)
            .await
            .context("failed to build services")?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = spawn_consumer(&services, &config, shutdown_rx).await?;

    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;

    info!(addr = %listener.local_addr()?, "listening");

    serve(listener, build_app(services), consumer, shutdown_tx, ctrl_c()).await?;

    info!("shut down");
    Ok(())
}

#[cfg(feature = "redis")]
async fn spawn_consumer(
    services: &AppServices,
    config: &Config,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<Option<ConsumerTask>> {
    let consumer = services
        .create_user_consumer(config)
        .await
        .context("failed to build create-user consumer")?;

    Ok(consumer.map(|consumer| tokio::spawn(async move { consumer.run(shutdown).await })))
}

#[cfg(not(feature = "redis"))]
async fn spawn_consumer(
    _services: &AppServices,
    _config: &Config,
    _shutdown: watch::Receiver<bool>,
) -> anyhow::Result<Option<ConsumerTask>> {
    Ok(None)
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
