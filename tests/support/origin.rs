use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::http_utils::{NOT_MODIFIED, header_value};

#[derive(Clone)]
enum Behavior {
    /// Answer the n-th request with the n-th response, repeating the last one.
    Sequence(Arc<Vec<Vec<u8>>>),
    /// Answer 304 when `If-Modified-Since` matches `last_modified`, else the full response.
    Conditional {
        full: Arc<Vec<u8>>,
        last_modified: String,
    },
    /// Accept, read the request, then close without answering.
    Silent,
}

/// Origin server on localhost that records every request head it receives.
pub struct MockOrigin {
    addr: SocketAddr,
    heads: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl MockOrigin {
    pub async fn sequence(responses: Vec<Vec<u8>>) -> Result<Self> {
        Self::spawn(Behavior::Sequence(Arc::new(responses)), None).await
    }

    pub async fn fixed(response: Vec<u8>) -> Result<Self> {
        Self::sequence(vec![response]).await
    }

    pub async fn conditional(full: Vec<u8>, last_modified: &str) -> Result<Self> {
        Self::spawn(
            Behavior::Conditional {
                full: Arc::new(full),
                last_modified: last_modified.to_string(),
            },
            None,
        )
        .await
    }

    pub async fn silent() -> Result<Self> {
        Self::spawn(Behavior::Silent, None).await
    }

    pub async fn delayed(response: Vec<u8>, delay: StdDuration) -> Result<Self> {
        Self::spawn(Behavior::Sequence(Arc::new(vec![response])), Some(delay)).await
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.addr.port())
    }

    pub fn request_count(&self) -> usize {
        self.heads.lock().unwrap().len()
    }

    pub fn request_heads(&self) -> Vec<String> {
        self.heads.lock().unwrap().clone()
    }

    /// `If-Modified-Since` of every request received so far, in arrival order.
    pub fn if_modified_since(&self) -> Vec<Option<String>> {
        self.request_heads()
            .iter()
            .map(|head| header_value(head, "If-Modified-Since"))
            .collect()
    }

    async fn spawn(behavior: Behavior, delay: Option<StdDuration>) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let heads = Arc::new(Mutex::new(Vec::new()));
        let recorded = heads.clone();
        let handle = tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let behavior = behavior.clone();
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, behavior, recorded, delay).await;
                });
            }
        });
        Ok(Self {
            addr,
            heads,
            handle,
        })
    }
}

impl Drop for MockOrigin {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn read_head(stream: &mut TcpStream) -> Result<String> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    while !data.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
    }
    Ok(String::from_utf8_lossy(&data).into_owned())
}

async fn serve(
    mut stream: TcpStream,
    behavior: Behavior,
    heads: Arc<Mutex<Vec<String>>>,
    delay: Option<StdDuration>,
) -> Result<()> {
    let head = read_head(&mut stream).await?;
    if head.is_empty() {
        return Ok(());
    }
    let index = {
        let mut heads = heads.lock().unwrap();
        heads.push(head.clone());
        heads.len() - 1
    };

    let response = match behavior {
        Behavior::Sequence(responses) => {
            let last = responses.len().saturating_sub(1);
            responses.get(index.min(last)).cloned().unwrap_or_default()
        }
        Behavior::Conditional {
            full,
            last_modified,
        } => {
            let since = header_value(&head, "If-Modified-Since");
            if since.as_deref() == Some(last_modified.as_str()) {
                NOT_MODIFIED.to_vec()
            } else {
                full.to_vec()
            }
        }
        Behavior::Silent => Vec::new(),
    };
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    stream.write_all(&response).await?;
    stream.shutdown().await.ok();
    Ok(())
}
