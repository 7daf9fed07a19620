pub mod cli;
pub mod io_util;
pub mod logging;
pub mod metrics;
pub mod proxy;
pub mod settings;
pub mod util;

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use crate::{
    proxy::{
        Engine, ProxyServer, StopHandle,
        cache::DiskStore,
        origin::TcpOrigin,
    },
    settings::Settings,
};

/// Engine backed by the on-disk cache in `cache_dir` and a plain TCP origin client.
pub async fn build_engine(settings: &Settings) -> Result<Engine> {
    let store = DiskStore::open(settings.cache_dir.clone()).await?;
    info!(cache_dir = %store.disk_dir().display(), "cache store ready");
    let origin = TcpOrigin::from_settings(settings);
    Ok(Engine::new(Arc::new(store), Arc::new(origin)))
}

pub async fn run(settings: Settings) -> Result<()> {
    let settings = Arc::new(settings);
    if let Some(addr) = settings.metrics_listen {
        tokio::spawn(async move {
            if let Err(err) = crate::metrics::serve(addr).await {
                error!(error = %err, "metrics endpoint failed");
            }
        });
    }

    let engine = Arc::new(build_engine(&settings).await?);
    let server = ProxyServer::bind(settings, engine).await?;
    spawn_shutdown_task(server.stop_handle());
    server.run().await
}

#[cfg(unix)]
fn spawn_shutdown_task(stop: StopHandle) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received interrupt; shutting down"),
            _ = term.recv() => info!("received SIGTERM; shutting down"),
        }
        stop.stop();
    });
}

#[cfg(not(unix))]
fn spawn_shutdown_task(stop: StopHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received interrupt; shutting down");
            stop.stop();
        }
    });
}
