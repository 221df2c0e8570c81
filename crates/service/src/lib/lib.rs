use std::sync::Arc;
use std::time::Duration;

use prometheus::Registry;
use tokio::sync::watch;

use beaconwatch_indexer::config::EnvVars;
use beaconwatch_indexer::pipeline::epoch_orchestrator::{EpochCreator, EpochOrchestrator};
use beaconwatch_indexer::prometheus_metrics::Registar;
use beaconwatch_indexer::runtime::IndexerRuntime;
use beaconwatch_indexer::tracing as tracing_config;
use beaconwatch_shared::chain::ChainInfo;

use common::AppState;

pub mod common;
pub mod server;

/// How long in-flight epoch work may drain after a shutdown signal before
/// its task is aborted (open transactions roll back, the resume is safe).
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

pub async fn service_main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let env_vars = EnvVars::init_from_env_or_crash();

    tracing_config::setup_logger(
        tracing_config::LoggingConfig::default()
            .use_level(&env_vars.log_level.value)
            .use_format(env_vars.log_format.value.clone())
            .with_thread_names(true),
    );

    let registry = Registry::new();
    let runtime = IndexerRuntime::init(&env_vars).await?;
    runtime.metrics.register_on(&registry)?;
    runtime
        .metrics
        .metadata
        .network_chain
        .with_label_values(&[&runtime.chain.as_str()])
        .set(1.0);
    runtime
        .metrics
        .metadata
        .app_build_info
        .with_label_values(&[env!("CARGO_PKG_VERSION")])
        .set(1.0);

    runtime.store.run_migrations().await?;
    runtime.controllers.validators.seed_if_empty().await?;

    let bind_addr = env_vars.service_bind_to_addr.value;
    let state = Arc::new(AppState {
        registry,
        env_vars,
        runtime,
    });
    state.log_config();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let creator = EpochCreator::new(
        Arc::clone(&state.runtime.store),
        state.runtime.time.clone(),
        state.runtime.max_unprocessed_epochs,
    );
    let mut creator_handle = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { creator.run(shutdown).await }
    });

    let orchestrator = EpochOrchestrator::new(
        Arc::clone(&state.runtime.controllers),
        Arc::clone(&state.runtime.store),
        state.runtime.time.clone(),
        Arc::clone(&state.runtime.metrics),
    );
    let mut orchestrator_handle = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { orchestrator.run(shutdown).await }
    });

    let server_handle = server::launch(Arc::clone(&state), bind_addr);

    wait_for_shutdown_signal().await;
    tracing::info!("Shutdown signal received, draining tasks");
    shutdown_tx.send(true).ok();

    let drain = async {
        let _ = (&mut creator_handle).await;
        let _ = (&mut orchestrator_handle).await;
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        tracing::warn!("Drain timed out, aborting remaining work");
        creator_handle.abort();
        orchestrator_handle.abort();
    }
    server_handle.abort();
    state.runtime.store.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut terminate =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(error) => {
                    tracing::error!("Failed to install SIGTERM handler: {error}");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
