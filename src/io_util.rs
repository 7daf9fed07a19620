use std::time::Duration;

use anyhow::{Result, bail};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use crate::util::{remaining_deadline, timeout_with_context};

const READ_CHUNK: usize = 4096;

pub async fn write_all_with_timeout<S>(
    stream: &mut S,
    bytes: &[u8],
    timeout_dur: Duration,
    context: &str,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    timeout_with_context(timeout_dur, stream.write_all(bytes), context).await?;
    timeout_with_context(timeout_dur, stream.flush(), context).await
}

/// Reads until the peer closes the stream, concatenating every chunk.
///
/// The whole read shares one deadline and the result may not grow past `max_bytes`.
pub async fn read_to_end_with_deadline<S>(
    stream: &mut S,
    deadline: Instant,
    max_bytes: usize,
    context: &str,
) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut collected = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let remaining = remaining_deadline(deadline, context)?;
        let read = timeout_with_context(remaining, stream.read(&mut chunk), context).await?;
        if read == 0 {
            return Ok(collected);
        }
        if collected.len() + read > max_bytes {
            bail!("{context}: response exceeds configured limit of {max_bytes} bytes");
        }
        collected.extend_from_slice(&chunk[..read]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn reads_until_close() -> Result<()> {
        let (mut writer, mut reader) = duplex(64);
        tokio::spawn(async move {
            writer.write_all(b"first ").await.unwrap();
            writer.write_all(b"second").await.unwrap();
        });
        let deadline = Instant::now() + Duration::from_secs(1);
        let bytes = read_to_end_with_deadline(&mut reader, deadline, 1024, "reading").await?;
        assert_eq!(bytes, b"first second");
        Ok(())
    }

    #[tokio::test]
    async fn enforces_size_limit() {
        let (mut writer, mut reader) = duplex(64);
        tokio::spawn(async move {
            writer.write_all(&[b'x'; 32]).await.unwrap();
        });
        let deadline = Instant::now() + Duration::from_secs(1);
        let err = read_to_end_with_deadline(&mut reader, deadline, 16, "reading")
            .await
            .expect_err("oversized stream must fail");
        assert!(err.to_string().contains("exceeds configured limit"));
    }

    #[tokio::test]
    async fn stalled_peer_times_out() {
        let (_writer, mut reader) = duplex(64);
        let deadline = Instant::now() + Duration::from_millis(20);
        let err = read_to_end_with_deadline(&mut reader, deadline, 16, "reading origin")
            .await
            .expect_err("stalled stream must time out");
        assert!(err.to_string().starts_with("timed out"));
    }
}
