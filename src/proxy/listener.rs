use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{AppContext, Engine, connection};
use crate::metrics::InflightGuard;
use crate::settings::Settings;

/// Accepts client connections and serves each one on its own task.
pub struct ProxyServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    app: AppContext,
    permits: Arc<Semaphore>,
    stop_tx: Arc<watch::Sender<bool>>,
}

/// Ends a running [`ProxyServer`]'s accept loop.
#[derive(Clone)]
pub struct StopHandle {
    stop_tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}

impl ProxyServer {
    pub async fn bind(settings: Arc<Settings>, engine: Arc<Engine>) -> Result<Self> {
        let app = AppContext::new(settings, engine);
        let bind_addr = app.settings.listen;
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("failed to bind listener on {}", bind_addr))?;
        let local_addr = listener.local_addr().unwrap_or(bind_addr);
        let permits = Arc::new(Semaphore::new(app.settings.max_connections));
        let (stop_tx, _) = watch::channel(false);
        Ok(Self {
            listener,
            local_addr,
            app,
            permits,
            stop_tx: Arc::new(stop_tx),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop_tx: self.stop_tx.clone(),
        }
    }

    /// Accept until stopped, then wait up to `client_timeout` for in-flight connections.
    pub async fn run(self) -> Result<()> {
        let mut stop_rx = self.stop_tx.subscribe();
        info!(address = %self.local_addr, "proxy listener started");

        while !*stop_rx.borrow_and_update() {
            let permit = tokio::select! {
                _ = stop_rx.changed() => break,
                permit = self.permits.clone().acquire_owned() => {
                    permit.context("connection limiter closed")?
                }
            };
            let (stream, peer_addr) = tokio::select! {
                _ = stop_rx.changed() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        error!(error = %err, "failed to accept incoming connection");
                        continue;
                    }
                },
            };
            debug!(peer = %peer_addr, "accepted connection");
            if let Err(err) = stream.set_nodelay(true) {
                debug!(peer = %peer_addr, error = %err, "failed to set TCP_NODELAY on client stream");
            }
            let connection_app = self.app.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let _inflight = InflightGuard::new();
                if let Err(err) =
                    connection::handle_connection(stream, peer_addr, connection_app).await
                {
                    debug!(peer = %peer_addr, error = %format!("{err:#}"), "connection closed with error");
                }
            });
        }

        info!(address = %self.local_addr, "proxy listener stopped");
        drop(self.listener);
        let max = u32::try_from(self.app.settings.max_connections).unwrap_or(u32::MAX);
        let drain = timeout(
            self.app.settings.client_timeout(),
            self.permits.acquire_many(max),
        )
        .await;
        if drain.is_err() {
            warn!("in-flight connections still open after shutdown grace period");
        }
        Ok(())
    }
}
