use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Result, anyhow};
use time::OffsetDateTime;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogFormat;

const DEFAULT_FILTER: &str = "info";

pub fn init_logger(format: LogFormat) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match format {
        LogFormat::Json => fmt::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .try_init()
            .map_err(|err| anyhow!(err))?,
        LogFormat::Text => fmt::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .try_init()
            .map_err(|err| anyhow!(err))?,
    }

    Ok(())
}

#[derive(Debug, Clone)]
pub struct AccessLogEvent {
    pub client_ip: IpAddr,
    pub client_port: u16,
    pub method: Option<String>,
    pub url: Option<String>,
    pub host: Option<String>,
    pub decision: String,
    pub cache_lookup: Option<String>,
    pub cache_store: Option<String>,
    pub status: Option<u16>,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub elapsed_ms: u128,
    pub error_reason: Option<String>,
}

#[derive(Debug)]
pub struct AccessLogBuilder {
    event: AccessLogEvent,
}

impl AccessLogBuilder {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            event: AccessLogEvent {
                client_ip: peer.ip(),
                client_port: peer.port(),
                method: None,
                url: None,
                host: None,
                decision: String::from("UNKNOWN"),
                cache_lookup: None,
                cache_store: None,
                status: None,
                bytes_in: 0,
                bytes_out: 0,
                elapsed_ms: 0,
                error_reason: None,
            },
        }
    }

    pub fn method(mut self, method: Option<impl Into<String>>) -> Self {
        self.event.method = method.map(Into::into);
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.event.url = Some(url.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.event.host = Some(host.into());
        self
    }

    pub fn decision(mut self, decision: impl Into<String>) -> Self {
        self.event.decision = decision.into();
        self
    }

    pub fn cache_lookup(mut self, value: impl Into<String>) -> Self {
        self.event.cache_lookup = Some(value.into());
        self
    }

    pub fn cache_store(mut self, value: impl Into<String>) -> Self {
        self.event.cache_store = Some(value.into());
        self
    }

    pub fn status(mut self, status: Option<u16>) -> Self {
        self.event.status = status;
        self
    }

    pub fn bytes(mut self, in_bytes: u64, out_bytes: u64) -> Self {
        self.event.bytes_in = in_bytes;
        self.event.bytes_out = out_bytes;
        self
    }

    pub fn elapsed(mut self, elapsed: Duration) -> Self {
        self.event.elapsed_ms = elapsed.as_millis();
        self
    }

    pub fn error_reason(mut self, reason: impl Into<String>) -> Self {
        self.event.error_reason = Some(reason.into());
        self
    }

    pub fn build(self) -> AccessLogEvent {
        self.event
    }

    pub fn log(self) {
        log_access(self.build());
    }
}

fn timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    let (year, month, day) = now.to_calendar_date();
    let (hour, minute, second) = now.to_hms();
    let millisecond = now.millisecond();
    let month_number: u8 = month.into();
    format!(
        "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{millisecond:03}Z",
        month = month_number
    )
}

pub fn log_access(event: AccessLogEvent) {
    let AccessLogEvent {
        client_ip,
        client_port,
        method,
        url,
        host,
        decision,
        cache_lookup,
        cache_store,
        status,
        bytes_in,
        bytes_out,
        elapsed_ms,
        error_reason,
    } = event;

    let ts = timestamp();
    tracing::info!(
        target = "access_log",
        ts,
        client_ip = %client_ip,
        client_port,
        method = method.as_deref(),
        url = url.as_deref(),
        host = host.as_deref(),
        decision,
        cache_lookup = cache_lookup.as_deref(),
        cache_store = cache_store.as_deref(),
        status,
        bytes_in,
        bytes_out,
        elapsed_ms,
        error_reason = error_reason.as_deref()
    );

    crate::metrics::record_request(
        &decision,
        status,
        Duration::from_millis(elapsed_ms as u64),
    );
}
