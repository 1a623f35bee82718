use std::net::SocketAddr;

use anyhow::{Context, Result};
use scorefinder_service::config::Config;
use scorefinder_service::metric;
use scorefinder_service::service::ScoreService;

use crate::endpoints;

/// Creates the service, warms its cache and serves HTTP on the configured address.
pub fn run(config: Config) -> Result<()> {
    // Log this metric before actually starting the server. This allows to see restarts even if
    // service creation fails.
    metric!(counter("server.starting") += 1);

    let megs = 1024 * 1024;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("scorefinder-web")
        .enable_all()
        .thread_stack_size(8 * megs)
        .build()?;

    runtime.block_on(async {
        let service = ScoreService::create(&config)
            .await
            .context("failed to create service state")?;

        if config.warm_on_startup {
            // Failures are logged by the fetcher, the maps are then loaded on first use.
            service.warm().await;
        }

        let socket = config
            .bind
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid bind address: {}", config.bind))?;
        tracing::info!("Starting HTTP server on {}", socket);

        axum_server::bind(socket)
            .serve(endpoints::create_app(service).into_make_service())
            .await?;

        tracing::info!("System shutdown complete");
        Ok::<_, anyhow::Error>(())
    })
}
