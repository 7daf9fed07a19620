use std::io::Write;
use std::net::SocketAddr;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Send one URL through the proxy and print whatever comes back.
#[derive(Debug, Parser)]
#[command(name = "condproxy-client")]
struct Args {
    /// Proxy address.
    #[arg(long, default_value = "127.0.0.1:8000")]
    proxy: SocketAddr,
    /// Send `GET <url> HTTP/1.0` plus a blank line instead of the bare URL.
    #[arg(long)]
    request_line: bool,
    /// URL to request; prompted for when omitted.
    url: Option<String>,
}

fn request_bytes(url: &str, request_line: bool) -> Vec<u8> {
    if request_line {
        format!("GET {url} HTTP/1.0\r\n\r\n").into_bytes()
    } else {
        url.as_bytes().to_vec()
    }
}

async fn prompt_for_url() -> Result<String> {
    print!("Enter the URL (e.g., http://www.example.com/): ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("failed to read URL from stdin")?;
    let url = line.trim().to_string();
    if url.is_empty() {
        bail!("no URL given");
    }
    Ok(url)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut stream = TcpStream::connect(args.proxy)
        .await
        .with_context(|| format!("failed to connect to proxy at {}", args.proxy))?;
    println!("Connected to {}", args.proxy);

    let url = match args.url {
        Some(url) => url,
        None => prompt_for_url().await?,
    };
    stream
        .write_all(&request_bytes(&url, args.request_line))
        .await
        .context("failed to send request")?;

    let mut chunk = [0u8; 1024];
    loop {
        let read = stream
            .read(&mut chunk)
            .await
            .context("error while receiving response")?;
        if read == 0 {
            println!("Connection closed by proxy");
            return Ok(());
        }
        print!("{}", String::from_utf8_lossy(&chunk[..read]));
    }
}
