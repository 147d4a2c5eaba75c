use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use lib_common::configs::load_config;
use lib_common::connections::{CubeCollector, MongoAdmin, MongoCredentials};
use lib_common::gateway::{fanout_router, serve};
use lib_common::ingestors::{FeedSettings, UpstreamFeed, ZmqConnector};
use lib_common::loggers::setup_logging;
use lib_common::sinks::{AnalyticsSink, ResetHandler};
use lib_common::{EventRouter, RelayStats};

mod monitor;

const APP_NAME: &str = "walletd_relay";

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;
    let log_path = setup_logging(&config.log_dir, &config.log_level, APP_NAME, config.log_keep)?;
    log::info!("{} starting, logging to {}", APP_NAME, log_path.display());

    let shutdown = CancellationToken::new();
    let router = EventRouter::new();
    let stats = Arc::new(RelayStats::new());

    let credentials = match (&config.mongodb_user, &config.mongodb_password) {
        (Some(user), Some(password)) => Some(MongoCredentials {
            user: user.clone(),
            password: password.clone(),
            auth_source: config.mongodb_database.clone(),
        }),
        _ => None,
    };
    let admin = Arc::new(MongoAdmin::connect(&config.mongodb_host, config.mongodb_port, credentials).await?);
    log::info!("MongoDB admin @ {}:{}", config.mongodb_host, config.mongodb_port);

    let cube = Arc::new(CubeCollector::new(&config.cube_host, config.cube_port)?);
    log::info!("Cube collector @ {}", cube.put_url());

    let connector = Arc::new(ZmqConnector::new(&config.zeromq_host, config.zeromq_port));
    let feed = Arc::new(UpstreamFeed::new(
        connector,
        router.clone(),
        AnalyticsSink::new(cube),
        ResetHandler::new(admin, config.cube_database.clone()),
        stats.clone(),
        FeedSettings {
            reconnect_base: config.reconnect_base,
            reconnect_max: config.reconnect_max,
            idle_timeout: config.idle_timeout,
        },
    ));

    let listener = TcpListener::bind((config.socketio_host.as_str(), config.socketio_port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.socketio_host, config.socketio_port))?;
    let app = fanout_router(router.clone(), &config.socketio_prefix, shutdown.clone());

    let feed_handle = {
        let feed = feed.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { feed.run(shutdown).await })
    };

    let monitor_handle = config.stats_interval.map(|period| {
        tokio::spawn(monitor::run(
            period,
            stats.clone(),
            router.clone(),
            feed.watch_state(),
            shutdown.clone(),
        ))
    });

    let server_handle = tokio::spawn(serve(listener, app, shutdown.clone()));

    shutdown_signal().await;
    shutdown.cancel();

    if let Err(e) = feed_handle.await {
        log::error!("Upstream feed task failed: {}", e);
    }
    if let Some(handle) = monitor_handle {
        let _ = handle.await;
    }
    match server_handle.await {
        Ok(Err(e)) => log::error!("Fanout server error: {}", e),
        Err(e) => log::error!("Fanout server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    log::info!("Shutdown complete. {:?}", stats.snapshot());
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        log::info!("Ctrl-C received, initiating shutdown.");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
                log::info!("SIGTERM received, initiating shutdown.");
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
