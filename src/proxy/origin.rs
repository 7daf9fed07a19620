use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use http::Uri;
use thiserror::Error;
use tokio::net::{TcpStream, lookup_host};
use tokio::time::Instant;
use tracing::debug;

use crate::io_util::{read_to_end_with_deadline, write_all_with_timeout};
use crate::settings::Settings;
use crate::util::{is_timeout, remaining_deadline, timeout_with_context};

pub const IF_MODIFIED_SINCE: &str = "If-Modified-Since";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to connect to origin {authority}: {reason}")]
    Connect { authority: String, reason: String },
    #[error("transfer from origin {authority} failed: {reason}")]
    Transfer { authority: String, reason: String },
}

impl FetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Transfer { .. } => "transfer",
        }
    }
}

/// Retrieves the raw bytes an origin sends for a URL.
#[async_trait]
pub trait Origin: Send + Sync {
    /// `since` turns the request into a conditional one carrying `If-Modified-Since`.
    async fn fetch(&self, uri: &Uri, since: Option<&str>) -> Result<Vec<u8>, FetchError>;
}

/// Where an origin request goes and what it asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginTarget {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl OriginTarget {
    pub fn from_uri(uri: &Uri, default_port: u16) -> Result<Self, FetchError> {
        let host = uri.host().filter(|host| !host.is_empty()).ok_or_else(|| {
            FetchError::Connect {
                authority: uri.to_string(),
                reason: "URL has no host".to_string(),
            }
        })?;
        let path = match uri.path() {
            "" => "/",
            path => path,
        };
        Ok(Self {
            host: host.to_string(),
            port: uri.port_u16().unwrap_or(default_port),
            path: path.to_string(),
        })
    }

    /// Host as handed to the resolver; IPv6 literals lose their brackets.
    pub fn resolve_host(&self) -> &str {
        self.host
            .strip_prefix('[')
            .and_then(|host| host.strip_suffix(']'))
            .unwrap_or(&self.host)
    }

    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn connect_error(&self, reason: impl std::fmt::Display) -> FetchError {
        FetchError::Connect {
            authority: self.authority(),
            reason: reason.to_string(),
        }
    }

    fn transfer_error(&self, reason: impl std::fmt::Display) -> FetchError {
        FetchError::Transfer {
            authority: self.authority(),
            reason: reason.to_string(),
        }
    }
}

/// Request bytes sent to the origin. `Connection: close` makes end-of-stream mark the response end.
pub fn build_origin_request(target: &OriginTarget, since: Option<&str>) -> Vec<u8> {
    let mut request = format!("GET {} HTTP/1.1\r\nHost: {}\r\n", target.path, target.host);
    if let Some(since) = since {
        request.push_str(&format!("{IF_MODIFIED_SINCE}: {since}\r\n"));
    }
    request.push_str("Connection: close\r\n\r\n");
    request.into_bytes()
}

/// Plain TCP origin client: one connection per fetch, read until the origin closes.
#[derive(Debug, Clone)]
pub struct TcpOrigin {
    default_port: u16,
    connect_timeout: Duration,
    io_timeout: Duration,
    max_response_size: usize,
}

impl TcpOrigin {
    pub fn new(
        default_port: u16,
        connect_timeout: Duration,
        io_timeout: Duration,
        max_response_size: usize,
    ) -> Self {
        Self {
            default_port,
            connect_timeout,
            io_timeout,
            max_response_size,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.origin_port,
            settings.upstream_connect_timeout(),
            settings.upstream_timeout(),
            settings.max_response_size,
        )
    }

    async fn connect(&self, target: &OriginTarget) -> Result<TcpStream, FetchError> {
        let deadline = Instant::now() + self.connect_timeout;
        let context = format!("resolving origin {}", target.authority());
        let addrs = timeout_with_context(
            self.connect_timeout,
            lookup_host((target.resolve_host(), target.port)),
            context,
        )
        .await
        .map_err(|err| target.connect_error(format!("{err:#}")))?;

        let mut seen = HashSet::new();
        let addrs: Vec<SocketAddr> = addrs.filter(|addr| seen.insert(*addr)).collect();
        if addrs.is_empty() {
            return Err(target.connect_error("name resolved to no addresses"));
        }

        let mut last_err = None;
        for addr in addrs {
            let context = format!("connecting to {addr}");
            let attempt = match remaining_deadline(deadline, &context) {
                Ok(remaining) => {
                    timeout_with_context(remaining, TcpStream::connect(addr), context).await
                }
                Err(err) => Err(err),
            };
            match attempt {
                Ok(stream) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        debug!(%addr, error = %err, "failed to set TCP_NODELAY on origin stream");
                    }
                    debug!(%addr, host = %target.host, "connected to origin");
                    return Ok(stream);
                }
                Err(err) => {
                    debug!(%addr, error = %format!("{err:#}"), "origin connect attempt failed");
                    last_err = Some(err);
                }
            }
        }
        Err(match last_err {
            Some(err) => target.connect_error(format!("{err:#}")),
            None => target.connect_error("no addresses attempted"),
        })
    }
}

#[async_trait]
impl Origin for TcpOrigin {
    async fn fetch(&self, uri: &Uri, since: Option<&str>) -> Result<Vec<u8>, FetchError> {
        let target = OriginTarget::from_uri(uri, self.default_port)?;
        let mut stream = self.connect(&target).await?;

        let deadline = Instant::now() + self.io_timeout;
        let request = build_origin_request(&target, since);
        let remaining = remaining_deadline(deadline, "sending origin request")
            .map_err(|err| target.transfer_error(err))?;
        write_all_with_timeout(&mut stream, &request, remaining, "sending origin request")
            .await
            .map_err(|err| target.transfer_error(format!("{err:#}")))?;

        let raw = read_to_end_with_deadline(
            &mut stream,
            deadline,
            self.max_response_size,
            "reading origin response",
        )
        .await
        .map_err(|err| {
            if is_timeout(&err) {
                debug!(host = %target.host, "origin response deadline elapsed");
            }
            target.transfer_error(format!("{err:#}"))
        })?;
        if raw.is_empty() {
            return Err(target.transfer_error("origin closed without sending a response"));
        }
        debug!(
            host = %target.host,
            path = %target.path,
            conditional = since.is_some(),
            bytes = raw.len(),
            "origin response received"
        );
        Ok(raw)
    }
}
