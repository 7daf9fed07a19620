use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::io_util::write_all_with_timeout;
use crate::util::timeout_with_context;

/// Sent when no acceptable URL could be extracted.
pub const BAD_REQUEST: &[u8] = b"HTTP/1.0 400 Bad Request\r\n\r\n";
/// Sent when the client stalls before completing its request.
pub const REQUEST_TIMEOUT: &[u8] = b"HTTP/1.0 408 Request Timeout\r\n\r\n";
/// Sent when the origin is unreachable and there is nothing cached to fall back on.
pub const BAD_GATEWAY: &[u8] = b"HTTP/1.0 502 Bad Gateway\r\n\r\n";

/// Write `bytes` verbatim and close the write side. Returns the number of bytes written.
pub async fn deliver<S>(stream: &mut S, bytes: &[u8], timeout_dur: Duration) -> Result<usize>
where
    S: AsyncWrite + Unpin,
{
    write_all_with_timeout(stream, bytes, timeout_dur, "writing response to client").await?;
    shutdown_stream(stream, timeout_dur).await?;
    Ok(bytes.len())
}

pub async fn shutdown_stream<S>(stream: &mut S, timeout_dur: Duration) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    timeout_with_context(
        timeout_dur,
        stream.shutdown(),
        "shutting down client stream",
    )
    .await
}
