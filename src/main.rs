use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use prometheus::Registry;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use validator::Validate;

use node_alert_sync::app_state::build_app_state;
use node_alert_sync::config::Config;
use node_alert_sync::core::client::http_client::build_http_client;
use node_alert_sync::core::client::kube_client::build_kube_client;
use node_alert_sync::core::client::nodes::KubeNodeClient;
use node_alert_sync::domain::alert::alert_cache::AlertCache;
use node_alert_sync::domain::node::condition_reconciler::ConditionReconciler;
use node_alert_sync::domain::node::reconcile_driver::ReconcileDriver;
use node_alert_sync::routes::app_router;
use node_alert_sync::scheduler::tasks::{alert_refresh, node_reconcile};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::parse();
    init_tracing(config.dev_mode);

    if let Err(err) = config.validate() {
        error!(error = %err, "invalid configuration");
        return Err(err).context("invalid configuration");
    }

    let registry = Registry::new();

    let http = build_http_client(config.alert_cache_ttl)?;
    let source = config.build_source(http);
    let matcher = config.build_matcher().context("failed to compile node matcher")?;
    let cache = Arc::new(AlertCache::new(source, matcher, &registry, config.alert_cache_ttl)?);
    cache.prime().await;

    let client = build_kube_client().await?;
    let reconciler = ConditionReconciler::new(&config.condition_prefix, config.linger_duration, &registry)?;
    let driver = Arc::new(ReconcileDriver::new(
        KubeNodeClient::new(client.clone()),
        cache.clone(),
        reconciler,
        config.node_resync,
        config.reconcile_timeout,
    ));

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let refresh = tokio::spawn(alert_refresh::task::run(
        cache.clone(),
        config.alert_cache_ttl,
        shutdown.clone(),
    ));

    let listener = tokio::net::TcpListener::bind(config.metrics_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.metrics_addr))?;
    info!(addr = %config.metrics_addr, "metrics server listening");
    let app = app_router(build_app_state(cache, registry));
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
    });

    node_reconcile::task::run(client, driver, config.max_concurrent_reconciles, shutdown.clone()).await;

    // The controller also stops when its watch ends; take everything else down with it.
    shutdown.cancel();
    if let Err(err) = refresh.await {
        error!(error = %err, "alert refresh task panicked");
    }
    server.await?.context("metrics server failed")?;

    info!("shutdown complete");
    Ok(())
}

fn init_tracing(dev_mode: bool) {
    let default_level = if dev_mode { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if dev_mode {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    }
}

async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}
