use std::net::SocketAddr;
use std::time::Instant;

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use super::AppContext;
use super::engine::{Decision, Outcome};
use super::request::{ClientReadTimeout, InboundMessage, extract, read_inbound};
use super::response;
use crate::logging::AccessLogBuilder;

/// Serve exactly one request on `stream`, then close it.
pub async fn handle_connection<S>(mut stream: S, peer: SocketAddr, app: AppContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let started = Instant::now();
    let settings = &app.settings;
    let mut log = AccessLogBuilder::new(peer);

    let inbound = read_inbound(
        &mut stream,
        settings.request_shape,
        settings.client_timeout(),
        settings.max_request_header_size,
    )
    .await;
    let (bytes, shape) = match inbound {
        Ok(InboundMessage::Complete { bytes, shape }) => (bytes, shape),
        Ok(InboundMessage::TooLarge { bytes_read }) => {
            warn!(peer = %peer, bytes_read, "client request exceeds configured limit");
            let outcome = Outcome::rejected(format!(
                "request exceeds configured limit of {} bytes",
                settings.max_request_header_size
            ));
            return finish(&mut stream, &app, outcome, bytes_read, log, started).await;
        }
        Ok(InboundMessage::Abandoned { bytes_read }) => {
            debug!(peer = %peer, bytes_read, "client closed before sending a request");
            log.decision(Decision::Abandoned.as_str())
                .bytes(bytes_read as u64, 0)
                .elapsed(started.elapsed())
                .log();
            return Ok(());
        }
        Err(err) => match err.downcast_ref::<ClientReadTimeout>() {
            Some(timeout) => {
                let bytes_read = timeout.bytes_read;
                debug!(peer = %peer, bytes_read, "client request timed out");
                let outcome = Outcome::timed_out(err.to_string());
                return finish(&mut stream, &app, outcome, bytes_read, log, started).await;
            }
            None => return Err(err.context("reading client request")),
        },
    };

    let outcome = match extract(&bytes, shape) {
        Ok(request) => {
            log = log
                .method(request.method.as_deref())
                .url(request.url.as_str())
                .host(request.host());
            app.engine.handle(&request).await
        }
        Err(failure) => {
            warn!(peer = %peer, error = %failure, "rejecting request");
            Outcome::rejected(failure.to_string())
        }
    };
    finish(&mut stream, &app, outcome, bytes.len(), log, started).await
}

async fn finish<S>(
    stream: &mut S,
    app: &AppContext,
    outcome: Outcome,
    bytes_in: usize,
    log: AccessLogBuilder,
    started: Instant,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut log = log
        .decision(outcome.decision.as_str())
        .cache_store(outcome.cache_store.as_str())
        .status(outcome.status_code());
    if let Some(lookup) = outcome.cache_lookup {
        log = log.cache_lookup(lookup.as_str());
    }
    if let Some(reason) = &outcome.error {
        log = log.error_reason(reason.as_str());
    }

    let delivered =
        response::deliver(stream, &outcome.response, app.settings.client_timeout()).await;
    let bytes_out = delivered.as_ref().map(|written| *written).unwrap_or(0);
    let log = log
        .bytes(bytes_in as u64, bytes_out as u64)
        .elapsed(started.elapsed());
    match delivered {
        Ok(_) => {
            log.log();
            Ok(())
        }
        Err(err) => {
            log.error_reason(format!("{err:#}")).log();
            Err(err)
        }
    }
}
