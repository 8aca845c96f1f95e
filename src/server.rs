//! Service lifecycle: startup ordering, background tasks, graceful shutdown.
//!
//! Startup order is store → cache/hub wiring → sweeper → ingest → broker →
//! rollup scheduler → HTTP → gRPC. Shutdown reverses it behind a five
//! second watchdog that hard-exits if anything refuses to drain.

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task;
use tracing::{debug, error, info, warn};

use crate::broker;
use crate::cache::{self, SharedVehicleCache, VehicleCache};
use crate::config::Config;
use crate::error::Result;
use crate::fanout::FanoutHub;
use crate::http::{self, AppState};
use crate::metrics::ServiceStats;
use crate::model::EnrichedVehicle;
use crate::pipeline::{self, IngestPipeline};
use crate::rpc::{self, FleetTelemetryService};
use crate::store::{StoreOptions, TelemetryStore};

const SHUTDOWN_WATCHDOG: Duration = Duration::from_secs(5);

/// Runs the whole service until a termination signal arrives.
pub async fn serve(config: Config) -> Result<()> {
    config.validate()?;

    let store = Arc::new(TelemetryStore::open(
        &config.telemetry_db.path,
        StoreOptions::from(&config.telemetry_db),
    )?);
    let stats = Arc::new(ServiceStats::new(config.message_window_ms));
    let cache: SharedVehicleCache = Arc::new(RwLock::new(VehicleCache::new(config.cache_limit)));
    let hub = Arc::new(FanoutHub::new(cache.clone(), &config.websocket));

    // TTL expiry tells subscribers the vehicle is gone; capacity eviction
    // does not, the vehicle is expected back on the next message.
    let sweeper = {
        let hub = hub.clone();
        cache::spawn_sweeper(
            cache.clone(),
            Duration::from_millis(config.vehicle_ttl_ms),
            Arc::new(move |id: &str, _entry: &EnrichedVehicle| hub.broadcast_remove(id)),
        )
    };

    let broker_ready = Arc::new(AtomicBool::new(false));
    let pipeline = Arc::new(IngestPipeline::new(
        cache.clone(),
        store.clone(),
        hub.clone(),
        stats.clone(),
    ));
    let (payload_tx, payload_rx) = mpsc::unbounded_channel();
    let ingest_task = pipeline::spawn_ingest_loop(pipeline, payload_rx);
    let broker = broker::spawn(
        &config.broker,
        config.subscription_topic.clone(),
        broker_ready.clone(),
        payload_tx,
    );

    let rollup_task = spawn_rollup_scheduler(
        store.clone(),
        Duration::from_millis(config.telemetry_db.rollup_interval_ms),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = AppState {
        cache: cache.clone(),
        hub: hub.clone(),
        store: store.clone(),
        stats: stats.clone(),
        broker_ready: broker_ready.clone(),
    };
    let router = http::build_router(state, &config.websocket.path);
    let http_addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = TcpListener::bind(http_addr).await.map_err(|err| {
        error!(%http_addr, error = %err, "cannot bind http listener");
        err
    })?;
    info!(%http_addr, "http listening");
    let mut http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.changed().await;
            })
            .await
    });

    let grpc_task = if config.grpc.enabled {
        let service = FleetTelemetryService::new(
            cache.clone(),
            store.clone(),
            stats.clone(),
            hub.clone(),
            &config.grpc,
        );
        let grpc_config = config.grpc.clone();
        let mut grpc_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            rpc::serve(service, &grpc_config, async move {
                let _ = grpc_shutdown.changed().await;
            })
            .await
        }))
    } else {
        None
    };

    shutdown_signal().await;
    info!("shutdown signal received");

    let watchdog = tokio::spawn(async {
        tokio::time::sleep(SHUTDOWN_WATCHDOG).await;
        error!("graceful shutdown timed out, exiting");
        std::process::exit(1);
    });

    // Stop accepting broker messages, then kill the timers before anything
    // else can schedule new work.
    broker.shutdown().await;
    if let Some(sweeper) = &sweeper {
        sweeper.stop();
    }
    rollup_task.abort();

    // Close the fan-out, closing every subscriber transport with it.
    hub.close_all();

    let _ = shutdown_tx.send(true);
    match http_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "http server error during shutdown"),
        Err(err) => warn!(error = %err, "http task failure during shutdown"),
    }
    if let Some(grpc_task) = grpc_task {
        match grpc_task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "grpc server error during shutdown"),
            Err(err) => warn!(error = %err, "grpc task failure during shutdown"),
        }
    }

    // Flush in-flight ingest work; the payload sender died with the broker
    // loop, so this drains whatever is queued and ends.
    if let Err(err) = ingest_task.await {
        warn!(error = %err, "ingest loop failure during shutdown");
    }

    watchdog.abort();
    info!("shutdown complete");
    Ok(())
}

fn spawn_rollup_scheduler(store: Arc<TelemetryStore>, period: Duration) -> task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let store = store.clone();
            let outcome =
                task::spawn_blocking(move || store.compute_rollups(OffsetDateTime::now_utc(), false))
                    .await;
            // The scheduler never propagates: log and wait for the next tick.
            match outcome {
                Ok(Ok(summary)) => {
                    debug!(buckets = summary.buckets_upserted(), "rollup pass complete")
                }
                Ok(Err(err)) => error!(error = %err, "rollup pass failed"),
                Err(err) => error!(error = %err, "rollup task failure"),
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
