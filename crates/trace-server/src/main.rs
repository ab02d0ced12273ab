//! Bootstrap binary (spec §6 "External interfaces", §2.2–§2.5): wires CLI,
//! configuration, logging, storage, the collector, the snapshot manager,
//! the reconstructor, and both HTTP surfaces (WebSocket streaming + REST
//! mirror) into one running process, then waits for `SIGINT`/`SIGTERM` to
//! drain cleanly. Grounded in the teacher's `main.rs` bootstrap sequence
//! (load env -> build config -> init logging -> construct services ->
//! start Actix -> await shutdown signal).

mod api;
mod cli;
mod config;
mod logging;
mod supervisor;

use std::process::ExitCode;
use std::sync::{Arc, RwLock};

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};

use trace_collector::Collector;
use trace_reconstruct::Reconstructor;
use trace_snapshot::SnapshotManager;
use trace_store::PostgresStore;

use crate::cli::Cli;
use crate::config::Config;
use crate::supervisor::Shutdown;

/// Tee channel capacity between the collector's flush path and the
/// streaming broadcaster; generous enough to absorb a burst without
/// applying backpressure to ingestion itself.
const LIVE_TEE_CAPACITY: usize = 1024;

fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = match Config::load(Some(&cli.config)) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.streaming.port = port;
            }
            config
        }
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(2);
        }
    };

    logging::init(&cli.log_level);

    if cli.print_config {
        match serde_json::to_string_pretty(&debug_config(&config)) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("failed to render config: {e}"),
        }
        return ExitCode::SUCCESS;
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::from(1);
        }
    };

    runtime.block_on(run(config))
}

/// Exit code 2 is reserved for configuration validation (already handled
/// in `main` before logging starts); everything from here on maps to
/// exit codes 0 (clean shutdown), 1 (uncaught startup error), 3 (storage
/// init failed), or 4 (streaming port in use).
async fn run(config: Config) -> ExitCode {
    let store = match PostgresStore::new(config.store.clone()) {
        Ok(store) => Arc::new(store) as Arc<dyn trace_store::PersistentStore>,
        Err(e) => {
            error!(error = %e, "storage initialization failed");
            return ExitCode::from(3);
        }
    };

    let (live_tx, live_rx) = mpsc::channel(LIVE_TEE_CAPACITY);

    let mut collector = Collector::new(Arc::clone(&store), config.collector.clone());
    if config.realtime_streaming {
        collector = collector.with_live_tee(live_tx);
    }
    let collector = Arc::new(collector);

    let snapshots = Arc::new(SnapshotManager::new(Arc::clone(&store), config.snapshot.clone()));
    let reconstructor = Arc::new(Reconstructor::new(Arc::clone(&store), Arc::clone(&snapshots)));

    let known_sessions = Arc::new(RwLock::new(Vec::new()));
    let shutdown = Shutdown::new();

    let streaming_handle = {
        let store = Arc::clone(&store);
        let reconstructor = Arc::clone(&reconstructor);
        let streaming_config = config.streaming.clone();
        tokio::spawn(async move {
            trace_streaming::server::run(streaming_config, store, reconstructor, live_rx).await
        })
    };

    // A port bind failure surfaces almost immediately; give the listener a
    // moment to fail before deciding the server is actually up.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    if streaming_handle.is_finished() {
        return match streaming_handle.await {
            Ok(Ok(())) => ExitCode::SUCCESS,
            Ok(Err(e)) => {
                error!(error = %e, port = config.streaming.port, "streaming server failed to bind");
                ExitCode::from(4)
            }
            Err(e) => {
                error!(error = %e, "streaming server task panicked during startup");
                ExitCode::from(1)
            }
        };
    }

    let api_state = api::ApiState {
        store: Arc::clone(&store),
        collector: Arc::clone(&collector),
        snapshots: Arc::clone(&snapshots),
        reconstructor: Arc::clone(&reconstructor),
        known_sessions: Arc::clone(&known_sessions),
    };
    let api_port = config.streaming.port + 1;
    let api_handle = tokio::spawn(async move { api::run(api_port, api_state).await });

    let flush_handle = supervisor::spawn_flush_ticker(
        Arc::clone(&collector),
        config.collector.flush_interval_ms.max(0) as u64,
        shutdown.clone(),
    );
    let retention_handle = supervisor::spawn_retention_sweeper(
        Arc::clone(&store),
        60 * 60 * 1000,
        shutdown.clone(),
    );
    let perf_handle = if config.performance_monitoring {
        Some(supervisor::spawn_performance_monitor(
            Arc::clone(&collector),
            Arc::clone(&known_sessions),
            5_000,
            shutdown.clone(),
        ))
    } else {
        None
    };

    info!(
        streaming_port = config.streaming.port,
        api_port,
        "trace-server ready"
    );

    tokio::select! {
        result = ctrl_c_or_terminate() => {
            if let Err(e) = result {
                error!(error = %e, "failed to install shutdown signal handler");
            }
            info!("shutdown signal received, draining");
        }
        result = streaming_handle => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "streaming server exited unexpectedly");
                    shutdown.trigger();
                    return ExitCode::from(1);
                }
                Err(e) => {
                    error!(error = %e, "streaming server task panicked");
                    shutdown.trigger();
                    return ExitCode::from(1);
                }
            }
        }
        result = api_handle => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "REST API exited unexpectedly");
                    shutdown.trigger();
                    return ExitCode::from(1);
                }
                Err(e) => {
                    error!(error = %e, "REST API task panicked");
                    shutdown.trigger();
                    return ExitCode::from(1);
                }
            }
        }
    }

    shutdown.trigger();
    let _ = flush_handle.await;
    retention_handle.abort();
    if let Some(h) = perf_handle {
        h.abort();
    }
    if let Err(e) = collector.flush().await {
        error!(error = %e, "final flush during shutdown failed");
    }
    info!("shutdown complete");
    ExitCode::SUCCESS
}

#[cfg(unix)]
async fn ctrl_c_or_terminate() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        r = tokio::signal::ctrl_c() => r,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn ctrl_c_or_terminate() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

fn debug_config(config: &Config) -> serde_json::Value {
    serde_json::json!({
        "realtime_streaming": config.realtime_streaming,
        "performance_monitoring": config.performance_monitoring,
        "log_level": config.log_level,
        "collector": {
            "enabled": config.collector.enabled,
            "sampling_rate": config.collector.sampling_rate,
            "buffer_size": config.collector.buffer_size,
            "batch_size": config.collector.batch_size,
            "flush_interval_ms": config.collector.flush_interval_ms,
        },
        "store": {
            "database_url": config.store.database_url,
            "connection_pool_size": config.store.connection_pool_size,
        },
        "streaming": {
            "port": config.streaming.port,
            "max_connections": config.streaming.max_connections,
        },
    })
}
