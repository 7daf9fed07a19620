use std::net::SocketAddr;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

pub const LAST_MODIFIED: &str = "Mon, 01 Jan 2024 00:00:00 GMT";
pub const NOT_MODIFIED: &[u8] = b"HTTP/1.1 304 Not Modified\r\n\r\n";

/// A complete origin response with an optional `Last-Modified` header.
pub fn http_ok(body: &str, last_modified: Option<&str>) -> Vec<u8> {
    let validator = last_modified
        .map(|value| format!("Last-Modified: {value}\r\n"))
        .unwrap_or_default();
    format!(
        "HTTP/1.1 200 OK\r\n{validator}Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

pub async fn read_all<S>(stream: &mut S) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    timeout(StdDuration::from_secs(10), stream.read_to_end(&mut buf))
        .await
        .map_err(|_| anyhow!("timed out waiting for proxy to close the connection"))??;
    Ok(buf)
}

/// Send `request` to the proxy and collect everything it answers until it closes.
pub async fn exchange(proxy: SocketAddr, request: &[u8]) -> Result<Vec<u8>> {
    let mut stream = TcpStream::connect(proxy)
        .await
        .with_context(|| format!("failed to connect to proxy at {proxy}"))?;
    stream.write_all(request).await?;
    read_all(&mut stream).await
}

pub fn status_of(raw: &[u8]) -> Option<u16> {
    let line = raw.split(|b| *b == b'\r').next()?;
    std::str::from_utf8(line)
        .ok()?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

/// Value of `name` in a request head, matched case-insensitively.
pub fn header_value(head: &str, name: &str) -> Option<String> {
    head.split("\r\n").skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().to_string())
    })
}
