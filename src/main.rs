mod api;
mod client;
mod config;
mod coordinator;
mod error;
mod geo;
mod models;
mod observability;
mod state;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    let config = config::Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let (app_state, event_rx) = state::AppState::new(&config);
    let shared_state = Arc::new(app_state);

    // pick up a mid-trip snapshot left by a previous run
    shared_state.coordinator.rehydrate().await;

    let app = api::rest::router(shared_state.clone());

    tokio::spawn(coordinator::events::run_event_loop(
        shared_state.coordinator.clone(),
        event_rx,
    ));
    let timers = coordinator::timers::spawn_timers(shared_state.coordinator.clone());

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| error::AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(
        http_port = config.http_port,
        driver_id = %config.driver_id,
        "trip coordinator started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| error::AppError::Internal(format!("server error: {err}")))?;

    timers.abort_all();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
