mod config;
mod main_lib;

use std::sync::Arc;

use config::Config;
use main_lib::{build_service, init_tracing, poll_watched, watch};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::from_env()?);
    init_tracing();

    let service = Arc::new(build_service(&config)?);
    let subscriptions = watch(&service, &config);

    service.start();
    tracing::info!(
        "Refreshing quotes every {:?}, watching {} series",
        config.engine.full_refresh_interval,
        config.watch_symbols.len()
    );

    let poller = tokio::spawn(poll_watched(Arc::clone(&service), Arc::clone(&config)));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    poller.abort();
    service.shutdown().await;
    for subscription in &subscriptions {
        subscription.unsubscribe();
    }
    Ok(())
}
