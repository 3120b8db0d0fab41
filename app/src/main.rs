//! Options market-data ingestion + analytics process entry point: wires
//! token refresh, the broker client, one ingestion and analytics task per
//! configured underlying, and a maintenance/pruning task, behind a shared
//! graceful-shutdown signal.

mod config;

use std::sync::Arc;
use std::time::Duration;

use analytics::{AnalyticsConfig, AnalyticsEngine};
use anyhow::Result;
use broker_client::{BrokerClient, RetryConfig};
use ingestion::{IngestionConfig, IngestionEngine};
use sqlx::postgres::PgPoolOptions;
use store::{PrunableTable, Store};
use tokio::sync::broadcast;
use token_source::{TokenSource, TokenSourceConfig};
use tracing::{error, info};

use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("starting options ingestion service v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(Store::new(pool));
    store.run_migrations().await?;

    let token_source = TokenSource::new(TokenSourceConfig {
        token_url: config.token_url.clone(),
        client_id: config.client_id.clone(),
        client_secret: config.client_secret.clone(),
        refresh_token: config.refresh_token.clone(),
        ..Default::default()
    });
    let client = Arc::new(BrokerClient::new(
        config.broker_base_url.clone(),
        token_source,
        RetryConfig::default(),
    ));

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut handles = Vec::new();

    for underlying in &config.underlyings {
        let ingestion_config = IngestionConfig {
            underlying: underlying.clone(),
            universe: config.universe,
            session_intervals: config.session_intervals,
            bucket_seconds: config.bucket_seconds,
            max_buffer_size: config.max_buffer_size,
            option_batch_size: config.option_batch_size,
            strike_cleanup_interval: config.strike_cleanup_interval,
            greeks_enabled: config.greeks_enabled,
            iv_enabled: config.iv_enabled,
            risk_free_rate: config.risk_free_rate,
            default_iv: config.default_iv,
        };
        let engine = IngestionEngine::new(ingestion_config, client.clone(), store.clone());
        let rx = shutdown_tx.subscribe();
        let underlying_name = underlying.clone();
        handles.push(tokio::spawn(async move {
            engine.run(rx).await;
            info!(underlying = %underlying_name, "ingestion task exited");
        }));

        let analytics_config = AnalyticsConfig {
            underlying: underlying.clone(),
            interval: config.analytics_interval,
            staleness_window: chrono::Duration::minutes(config.staleness_window_minutes),
        };
        let analytics_engine = AnalyticsEngine::new(analytics_config, store.clone());
        let rx = shutdown_tx.subscribe();
        let underlying_name = underlying.clone();
        handles.push(tokio::spawn(async move {
            analytics_engine.run(rx).await;
            info!(underlying = %underlying_name, "analytics task exited");
        }));
    }

    let maintenance_store = store.clone();
    let maintenance_config = config.clone();
    let rx = shutdown_tx.subscribe();
    handles.push(tokio::spawn(async move {
        run_maintenance(maintenance_store, maintenance_config, rx).await;
    }));

    shutdown_signal(shutdown_tx).await;

    for handle in handles {
        let _ = handle.await;
    }

    info!("options ingestion service shutdown complete");
    Ok(())
}

/// Periodic retention sweep over the raw-quote and analytics tables
/// (`PruneOlderThan`), run on its own interval independent of ingestion and
/// analytics.
async fn run_maintenance(store: Arc<Store>, config: Config, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(config.maintenance_interval.max(Duration::from_secs(1)));

    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                info!("maintenance task shutting down");
                return;
            }
            _ = ticker.tick() => {
                let raw_retention = chrono::Duration::days(config.retention_raw_quotes_days);
                if let Err(e) = store.prune_older_than(PrunableTable::RawQuotes, raw_retention).await {
                    error!(error = %e, "failed to prune raw quotes");
                }

                let quality_retention = chrono::Duration::days(config.retention_quality_log_days);
                if let Err(e) = store.prune_older_than(PrunableTable::QualityLog, quality_retention).await {
                    error!(error = %e, "failed to prune analytics history");
                }
            }
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "options_ingestor=info,ingestion=info,analytics=info".into()),
        )
        .init();
}

/// Waits for Ctrl+C or SIGTERM (whichever arrives first).
async fn one_termination_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!("failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    one_termination_signal().await;
    info!("received shutdown signal, initiating graceful shutdown");
    let _ = shutdown_tx.send(());

    // A second signal during the grace period forces an immediate exit
    // instead of waiting for in-flight writes to drain.
    tokio::select! {
        () = one_termination_signal() => {
            error!("second shutdown signal received, forcing immediate exit");
            std::process::exit(1);
        }
        () = tokio::time::sleep(Duration::from_secs(5)) => {}
    }
}
