use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail, ensure};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::cli::{Cli, LogFormat};
use crate::proxy::request::RequestShape;

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

fn default_client_timeout() -> u64 {
    30
}

fn default_upstream_connect_timeout() -> u64 {
    5
}

fn default_upstream_timeout() -> u64 {
    60
}

fn default_max_request_header_size() -> usize {
    32 * 1024
}

fn default_max_response_size() -> usize {
    64 * 1024 * 1024
}

fn default_max_connections() -> usize {
    1024
}

fn default_origin_port() -> u16 {
    80
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub listen: SocketAddr,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
    #[serde(default = "default_client_timeout")]
    pub client_timeout: u64,
    #[serde(default = "default_upstream_connect_timeout")]
    pub upstream_connect_timeout: u64,
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout: u64,
    #[serde(default = "default_max_request_header_size")]
    pub max_request_header_size: usize,
    #[serde(default = "default_max_response_size")]
    pub max_response_size: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default)]
    pub request_shape: RequestShape,
    #[serde(default = "default_origin_port")]
    pub origin_port: u16,
    #[serde(default)]
    pub metrics_listen: Option<SocketAddr>,
}

impl Settings {
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder();
        let config_path = resolve_config_path(cli)?;

        builder = builder.add_source(File::from(config_path.clone()).required(true));

        builder = builder.add_source(
            Environment::with_prefix("CONDPROXY")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().map_err(to_anyhow)?;
        let mut settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        settings.apply_base_dir(&config_path);
        settings.validate()?;
        Ok(settings)
    }

    /// Settings with every optional key at its default, for embedding without a config file.
    pub fn with_defaults(listen: SocketAddr, cache_dir: PathBuf) -> Self {
        Self {
            listen,
            cache_dir,
            log: default_log_format(),
            client_timeout: default_client_timeout(),
            upstream_connect_timeout: default_upstream_connect_timeout(),
            upstream_timeout: default_upstream_timeout(),
            max_request_header_size: default_max_request_header_size(),
            max_response_size: default_max_response_size(),
            max_connections: default_max_connections(),
            request_shape: RequestShape::default(),
            origin_port: default_origin_port(),
            metrics_listen: None,
        }
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout)
    }

    pub fn upstream_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_connect_timeout)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.client_timeout > 0,
            "client_timeout must be greater than 0 seconds (got {})",
            self.client_timeout
        );
        ensure!(
            self.upstream_connect_timeout > 0,
            "upstream_connect_timeout must be greater than 0 seconds (got {})",
            self.upstream_connect_timeout
        );
        ensure!(
            self.upstream_timeout > 0,
            "upstream_timeout must be greater than 0 seconds (got {})",
            self.upstream_timeout
        );
        ensure!(
            self.max_request_header_size > 0,
            "max_request_header_size must be greater than 0 (got {})",
            self.max_request_header_size
        );
        ensure!(
            self.max_response_size > 0,
            "max_response_size must be greater than 0 (got {})",
            self.max_response_size
        );
        ensure!(
            self.max_connections > 0,
            "max_connections must be at least 1 (got {})",
            self.max_connections
        );
        ensure!(
            self.max_connections <= Semaphore::MAX_PERMITS,
            "max_connections must not exceed {} (got {})",
            Semaphore::MAX_PERMITS,
            self.max_connections
        );
        ensure!(self.origin_port > 0, "origin_port must not be 0");
        if let Some(metrics) = self.metrics_listen
            && metrics == self.listen
        {
            bail!("metrics_listen must differ from listen ({metrics})");
        }
        Ok(())
    }

    fn apply_base_dir(&mut self, config_path: &Path) {
        let base_dir = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        self.cache_dir = absolutize(&self.cache_dir, base_dir);
    }
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow::anyhow!(err)
}

fn resolve_config_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(path) = cli.config.as_deref() {
        return Ok(path.to_path_buf());
    }

    for candidate in default_config_candidates() {
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    bail!(
        "no configuration file provided via --config and none found in default locations: {}",
        default_config_candidates()
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
}

fn default_config_candidates() -> [PathBuf; 2] {
    [
        PathBuf::from("/etc/condproxy/condproxy.toml"),
        PathBuf::from("condproxy.toml"),
    ]
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
