use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Result, anyhow, bail, ensure};
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpListener,
    time::timeout,
};
use tracing::{debug, info};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("requests_total", "Total requests by decision");
    let vec = IntCounterVec::new(opts, &["decision"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register requests_total");
    vec
});

static REQUEST_STATUS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("requests_status_total", "Requests by status class");
    let vec = IntCounterVec::new(opts, &["status_class"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register requests_status_total");
    vec
});

static REQUEST_LATENCY_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    let opts = HistogramOpts::new("request_duration_seconds", "Time to serve one client request")
        .buckets(latency_buckets());
    let histogram = Histogram::with_opts(opts).expect("create histogram");
    REGISTRY
        .register(Box::new(histogram.clone()))
        .expect("register request_duration_seconds");
    histogram
});

static CACHE_LOOKUP_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("cache_lookup_total", "Cache lookups by result");
    let vec = IntCounterVec::new(opts, &["result"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register cache_lookup_total");
    vec
});

static CACHE_STORE_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("cache_store_total", "Cache entries written")
        .expect("create cache_store_total");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_store_total");
    counter
});

static CACHE_STORE_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("cache_store_errors_total", "Cache writes that failed")
        .expect("create cache_store_errors_total");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_store_errors_total");
    counter
});

static ORIGIN_FETCH_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let vec = IntCounterVec::new(
        Opts::new("origin_fetch_total", "Origin fetches by kind and result"),
        &["kind", "result"],
    )
    .expect("create origin_fetch_total");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register origin_fetch_total");
    vec
});

static INFLIGHT_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("inflight_connections", "Client connections being served")
        .expect("create gauge");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("register inflight_connections");
    gauge
});

fn latency_buckets() -> Vec<f64> {
    vec![
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
    ]
}

const METRICS_PATH: &str = "/metrics";
const METRICS_MAX_REQUEST_BYTES: usize = 8192;
const METRICS_READ_TIMEOUT: Duration = Duration::from_secs(5);

fn status_class(status: Option<u16>) -> &'static str {
    match status {
        Some(200..=299) => "2xx",
        Some(300..=399) => "3xx",
        Some(400..=499) => "4xx",
        Some(500..=599) => "5xx",
        _ => "other",
    }
}

/// Keeps `inflight_connections` raised for as long as it lives.
pub struct InflightGuard(());

impl InflightGuard {
    pub fn new() -> Self {
        INFLIGHT_CONNECTIONS.inc();
        Self(())
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        INFLIGHT_CONNECTIONS.dec();
    }
}

pub fn record_request(decision: &str, status: Option<u16>, elapsed: Duration) {
    REQUESTS_TOTAL.with_label_values(&[decision]).inc();
    REQUEST_STATUS_TOTAL
        .with_label_values(&[status_class(status)])
        .inc();
    REQUEST_LATENCY_SECONDS.observe(elapsed.as_secs_f64());
}

pub fn record_cache_lookup(hit: bool) {
    let label = if hit { "hit" } else { "miss" };
    CACHE_LOOKUP_TOTAL.with_label_values(&[label]).inc();
}

pub fn record_cache_store() {
    CACHE_STORE_TOTAL.inc();
}

pub fn record_cache_store_error() {
    CACHE_STORE_ERRORS_TOTAL.inc();
}

pub fn record_origin_fetch(conditional: bool, result: &str) {
    let kind = if conditional {
        "conditional"
    } else {
        "unconditional"
    };
    ORIGIN_FETCH_TOTAL.with_label_values(&[kind, result]).inc();
}

pub fn gather() -> Vec<u8> {
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        debug!(error = %err, "failed to encode metrics");
    }
    buffer
}

pub async fn serve(addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "metrics endpoint listening");
    loop {
        let (stream, _) = listener.accept().await?;
        tokio::spawn(async move {
            if let Err(err) =
                handle_stream(stream, METRICS_READ_TIMEOUT, METRICS_MAX_REQUEST_BYTES).await
            {
                debug!(error = %err, "metrics handler error");
            }
        });
    }
}

async fn handle_stream<S>(stream: S, read_timeout: Duration, max_bytes: usize) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut total_bytes = 0usize;
    let request_line = read_line_with_limits(
        &mut reader,
        read_timeout,
        max_bytes,
        &mut total_bytes,
        "reading metrics request line",
    )
    .await?;
    let Some(request_line) = request_line else {
        return Ok(());
    };
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let path = parts.next().unwrap_or_default();

    // Headers are drained and ignored.
    loop {
        let line = read_line_with_limits(
            &mut reader,
            read_timeout,
            max_bytes,
            &mut total_bytes,
            "reading metrics request headers",
        )
        .await?;
        match line.as_deref() {
            None | Some("\r\n") | Some("\n") => break,
            Some(_) => {}
        }
    }

    let response = if method == "GET" && path == METRICS_PATH {
        build_response("200 OK", TextEncoder::new().format_type(), gather())
    } else {
        build_response("404 Not Found", "text/plain", b"not found".to_vec())
    };
    reader.get_mut().write_all(&response).await?;
    reader.get_mut().shutdown().await?;
    Ok(())
}

fn build_response(status: &str, content_type: &str, body: Vec<u8>) -> Vec<u8> {
    let header = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nContent-Type: {content_type}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let mut response = header.into_bytes();
    response.extend_from_slice(&body);
    response
}

async fn read_line_with_limits<R>(
    reader: &mut BufReader<R>,
    timeout_dur: Duration,
    max_bytes: usize,
    total: &mut usize,
    context: &str,
) -> Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    ensure!(max_bytes > 0, "max_bytes must be greater than zero");
    let mut collected = Vec::new();
    loop {
        let available = timeout(timeout_dur, reader.fill_buf())
            .await
            .map_err(|_| anyhow!("timed out {context}"))??;
        if available.is_empty() {
            if collected.is_empty() {
                return Ok(None);
            }
            bail!("connection closed while {context}");
        }
        let newline_pos = available.iter().position(|byte| *byte == b'\n');
        let consume = newline_pos.map(|idx| idx + 1).unwrap_or(available.len());
        if *total + collected.len() + consume > max_bytes {
            bail!("metrics request exceeded allowed size");
        }
        collected.extend_from_slice(&available[..consume]);
        reader.consume(consume);
        if newline_pos.is_some() {
            break;
        }
    }
    *total += collected.len();
    let line = String::from_utf8(collected)
        .map_err(|_| anyhow!("metrics request contained invalid bytes"))?;
    Ok(Some(line))
}
