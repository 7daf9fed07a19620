use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use tokio::task::JoinHandle;

use condproxy::{
    build_engine,
    cli::LogFormat,
    proxy::{ProxyServer, StopHandle},
    settings::Settings,
};

use super::dirs::TestDirs;
use super::http_utils::exchange;

fn default_test_settings(dirs: &TestDirs) -> Settings {
    let mut settings = Settings::with_defaults(
        "127.0.0.1:0".parse().expect("loopback address"),
        dirs.cache_dir.clone(),
    );
    settings.log = LogFormat::Text;
    settings.client_timeout = 5;
    settings.upstream_connect_timeout = 2;
    settings.upstream_timeout = 5;
    settings
}

/// A running proxy on an ephemeral port, backed by a temporary cache directory.
pub struct ProxyHarness {
    pub dirs: TestDirs,
    pub addr: SocketAddr,
    pub settings: Arc<Settings>,
    stop: StopHandle,
    handle: JoinHandle<Result<()>>,
}

impl ProxyHarness {
    pub async fn spawn() -> Result<Self> {
        Self::spawn_with(|_| {}).await
    }

    pub async fn spawn_with(configure: impl FnOnce(&mut Settings)) -> Result<Self> {
        Self::spawn_in(TestDirs::new()?, configure).await
    }

    /// Start a proxy over existing directories, e.g. to reuse a cache across restarts.
    pub async fn spawn_in(dirs: TestDirs, configure: impl FnOnce(&mut Settings)) -> Result<Self> {
        let mut settings = default_test_settings(&dirs);
        configure(&mut settings);
        settings.validate()?;
        let settings = Arc::new(settings);

        let engine = Arc::new(build_engine(&settings).await?);
        let server = ProxyServer::bind(settings.clone(), engine).await?;
        let addr = server.local_addr();
        let stop = server.stop_handle();
        let handle = tokio::spawn(server.run());

        Ok(Self {
            dirs,
            addr,
            settings,
            stop,
            handle,
        })
    }

    pub async fn send(&self, request: &[u8]) -> Result<Vec<u8>> {
        exchange(self.addr, request).await
    }

    /// Request `url` using the raw-line client shape.
    pub async fn get(&self, url: &str) -> Result<Vec<u8>> {
        self.send(url.as_bytes()).await
    }

    /// Request `url` using an HTTP request line.
    pub async fn get_request_line(&self, url: &str) -> Result<Vec<u8>> {
        let request = format!("GET {url} HTTP/1.1\r\nHost: proxy\r\nUser-Agent: test\r\n\r\n");
        self.send(request.as_bytes()).await
    }

    pub fn cached(&self, url: &str) -> Option<Vec<u8>> {
        std::fs::read(self.dirs.cache_file(url)).ok()
    }

    /// Stop accepting, wait for the accept loop to exit, and hand back the directories.
    pub async fn shutdown(self) -> Result<TestDirs> {
        self.stop.stop();
        self.handle
            .await
            .map_err(|err| anyhow!("proxy task failed: {err}"))??;
        Ok(self.dirs)
    }
}
