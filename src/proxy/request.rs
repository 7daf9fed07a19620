use std::time::Duration;

use anyhow::Result;
use http::Uri;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

use crate::util::{remaining_deadline, timeout_with_context};

pub const URL_PREFIX: &str = "http://";
const HEAD_DELIMITER: &[u8] = b"\r\n\r\n";
const READ_CHUNK: usize = 4096;

/// Which inbound wire forms the listener accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestShape {
    /// Classify each connection by its first bytes.
    #[default]
    Auto,
    /// The whole message is the URL.
    RawLine,
    /// `METHOD target VERSION` followed by headers and a blank line.
    RequestLine,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionFailure {
    #[error("request did not contain a URL")]
    Empty,
    #[error("request was not valid UTF-8")]
    InvalidEncoding,
    #[error("malformed request line '{0}'")]
    MalformedRequestLine(String),
    #[error("URL '{0}' does not start with http://")]
    UnsupportedUrl(String),
    #[error("URL '{0}' is not an absolute http URL")]
    InvalidUrl(String),
}

/// An absolute URL recovered from the client that passed the acceptance check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    pub method: Option<String>,
    pub url: String,
    pub uri: Uri,
}

impl ClientRequest {
    pub fn host(&self) -> &str {
        self.uri.host().unwrap_or_default()
    }
}

/// Result of reading the inbound message off the client connection.
#[derive(Debug)]
pub enum InboundMessage {
    /// Bytes ready for [`extract`], tagged with the shape they were framed as.
    Complete { bytes: Vec<u8>, shape: RequestShape },
    /// Buffered bytes exceeded the configured limit.
    TooLarge { bytes_read: usize },
    /// The client closed before a complete message arrived.
    Abandoned { bytes_read: usize },
}

#[derive(Debug, Error)]
#[error("timed out reading client request after {bytes_read} bytes")]
pub struct ClientReadTimeout {
    pub bytes_read: usize,
}

/// Decide which shape a partially buffered message has, if that is knowable yet.
pub fn classify(buf: &[u8]) -> Option<RequestShape> {
    let line_end = buf.iter().position(|b| *b == b'\r' || *b == b'\n');
    let first_line = &buf[..line_end.unwrap_or(buf.len())];
    let token_len = first_line
        .iter()
        .take_while(|b| b.is_ascii_uppercase())
        .count();

    if token_len > 0 && first_line.get(token_len) == Some(&b' ') {
        return Some(RequestShape::RequestLine);
    }
    if token_len == first_line.len() && line_end.is_none() {
        // Could still be the front of a method token.
        return None;
    }
    Some(RequestShape::RawLine)
}

/// Read one inbound message from the client according to `shape`.
///
/// Returns `Err(ClientReadTimeout)` (inside `anyhow`) when the deadline elapses before the message
/// is complete; other I/O failures propagate unchanged.
pub async fn read_inbound<S>(
    stream: &mut S,
    shape: RequestShape,
    timeout_dur: Duration,
    max_bytes: usize,
) -> Result<InboundMessage>
where
    S: AsyncRead + Unpin,
{
    let deadline = Instant::now() + timeout_dur;
    let context = "reading client request";
    let mut buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let remaining = match remaining_deadline(deadline, context) {
            Ok(remaining) => remaining,
            Err(_) => return Err(ClientReadTimeout { bytes_read: buf.len() }.into()),
        };
        let read = match timeout_with_context(remaining, stream.read(&mut chunk), context).await {
            Ok(read) => read,
            Err(err) if crate::util::is_timeout(&err) => {
                return Err(ClientReadTimeout { bytes_read: buf.len() }.into());
            }
            Err(err) => return Err(err),
        };
        if read == 0 {
            // A bare URL needs no terminator, so end of stream completes it.
            if !buf.is_empty() && framed_shape(&buf, shape) == Some(RequestShape::RawLine) {
                return Ok(InboundMessage::Complete {
                    bytes: buf,
                    shape: RequestShape::RawLine,
                });
            }
            return Ok(InboundMessage::Abandoned {
                bytes_read: buf.len(),
            });
        }
        buf.extend_from_slice(&chunk[..read]);
        if buf.len() > max_bytes {
            return Ok(InboundMessage::TooLarge {
                bytes_read: buf.len(),
            });
        }

        match framed_shape(&buf, shape) {
            // A short read without a terminator is the whole URL; a full chunk may have more behind it.
            Some(RequestShape::RawLine) if contains_line_end(&buf) || read < READ_CHUNK => {
                return Ok(InboundMessage::Complete {
                    bytes: buf,
                    shape: RequestShape::RawLine,
                });
            }
            Some(RequestShape::RequestLine) if contains_delimiter(&buf) => {
                return Ok(InboundMessage::Complete {
                    bytes: buf,
                    shape: RequestShape::RequestLine,
                });
            }
            _ => {}
        }
    }
}

fn framed_shape(buf: &[u8], shape: RequestShape) -> Option<RequestShape> {
    match shape {
        RequestShape::Auto => classify(buf),
        other => Some(other),
    }
}

fn contains_line_end(buf: &[u8]) -> bool {
    buf.iter().any(|b| *b == b'\r' || *b == b'\n')
}

fn contains_delimiter(buf: &[u8]) -> bool {
    buf.windows(HEAD_DELIMITER.len())
        .any(|window| window == HEAD_DELIMITER)
}

/// Recover the target URL from a framed inbound message.
pub fn extract(bytes: &[u8], shape: RequestShape) -> Result<ClientRequest, ExtractionFailure> {
    let shape = match shape {
        RequestShape::Auto => classify(bytes).unwrap_or(RequestShape::RawLine),
        other => other,
    };
    match shape {
        RequestShape::RequestLine => extract_request_line(bytes),
        _ => extract_raw_line(bytes),
    }
}

fn extract_raw_line(bytes: &[u8]) -> Result<ClientRequest, ExtractionFailure> {
    let line = first_line(bytes)?;
    let url = line.trim();
    if url.is_empty() {
        return Err(ExtractionFailure::Empty);
    }
    accept_url(None, url)
}

fn extract_request_line(bytes: &[u8]) -> Result<ClientRequest, ExtractionFailure> {
    let line = first_line(bytes)?;
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let [method, target, _version] = tokens.as_slice() else {
        return Err(ExtractionFailure::MalformedRequestLine(line.trim().to_string()));
    };
    accept_url(Some(*method), target)
}

fn first_line(bytes: &[u8]) -> Result<&str, ExtractionFailure> {
    let end = bytes
        .iter()
        .position(|b| *b == b'\r' || *b == b'\n')
        .unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end]).map_err(|_| ExtractionFailure::InvalidEncoding)
}

fn accept_url(method: Option<&str>, url: &str) -> Result<ClientRequest, ExtractionFailure> {
    if !url.starts_with(URL_PREFIX) {
        return Err(ExtractionFailure::UnsupportedUrl(url.to_string()));
    }
    let uri: Uri = url
        .parse()
        .map_err(|_| ExtractionFailure::InvalidUrl(url.to_string()))?;
    match uri.host() {
        Some(host) if !host.is_empty() => {}
        _ => return Err(ExtractionFailure::InvalidUrl(url.to_string())),
    }
    Ok(ClientRequest {
        method: method.map(str::to_string),
        url: url.to_string(),
        uri,
    })
}
