//! Binary entry point, mirroring `helix-server/src/main.rs`: load config,
//! initialise tracing, build shared state, wire the router, serve.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rhinobox_core::config::Config;
use rhinobox_core::temp;
use rhinobox_server::app_state::{AppState, SharedState};
use rhinobox_server::router;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let data_path = config.data_path();
    if let Ok(removed) = temp::sweep_stale_temp(&data_path, Duration::from_secs(3600)) {
        if removed > 0 {
            tracing::info!(removed, "swept stale temp files on startup");
        }
    }

    let bind_addr: SocketAddr = config.bind_addr.parse()?;
    let state = Arc::new(AppState::new(config)?);

    spawn_rate_limiter_sweeper(state.clone());

    let app = router::build(state);

    tracing::info!(%bind_addr, "rhinobox-server listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Evicts idle rate-limit buckets every five minutes so long-lived
/// deployments don't accumulate one bucket per distinct client forever.
fn spawn_rate_limiter_sweeper(state: SharedState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            state.rate_limiter.sweep();
        }
    });
}
