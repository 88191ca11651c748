use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use telemon_transport::ClientConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// HTTP sink address, `host:port` or a full URL.
    #[serde(default = "default_server_address")]
    pub server_address: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Job queue capacity. Defaults to the worker count.
    #[serde(default)]
    pub queue_size: Option<usize>,
    /// HMAC signing key; empty disables signing.
    #[serde(default)]
    pub key: String,
    /// Public key for HTTP payload encryption, or CA certificate for gRPC
    /// TLS; empty disables both.
    #[serde(default)]
    pub crypto_key: String,
    #[serde(default)]
    pub real_ip: String,
    #[serde(default = "default_compress")]
    pub compress: bool,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub grpc: GrpcConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GrpcConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_grpc_address")]
    pub address: String,
    #[serde(default = "default_grpc_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_server_address() -> String {
    "localhost:8080".to_string()
}

fn default_poll_interval() -> u64 {
    2
}

fn default_report_interval() -> u64 {
    10
}

fn default_workers() -> usize {
    3
}

fn default_compress() -> bool {
    true
}

fn default_http_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_grpc_address() -> String {
    "localhost:3200".to_string()
}

fn default_grpc_timeout() -> u64 {
    5
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_grpc_address(),
            timeout_secs: default_grpc_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_address: default_server_address(),
            poll_interval_secs: default_poll_interval(),
            report_interval_secs: default_report_interval(),
            workers: default_workers(),
            queue_size: None,
            key: String::new(),
            crypto_key: String::new(),
            real_ip: String::new(),
            compress: default_compress(),
            http_timeout_secs: default_http_timeout(),
            max_retries: default_max_retries(),
            grpc: GrpcConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be greater than zero");
        }
        if self.report_interval_secs == 0 {
            bail!("report_interval_secs must be greater than zero");
        }
        if self.workers == 0 {
            bail!("workers must be greater than zero");
        }
        if self.queue_size == Some(0) {
            bail!("queue_size must be greater than zero");
        }
        if self.grpc.enabled && self.grpc.timeout_secs == 0 {
            bail!("grpc.timeout_secs must be greater than zero");
        }
        if !self.grpc.enabled && self.http_timeout_secs == 0 {
            bail!("http_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn queue_size(&self) -> usize {
        self.queue_size.unwrap_or(self.workers)
    }

    /// Plain values for [`telemon_transport::build_client`]. Empty strings
    /// become `None`.
    pub fn to_client_config(&self) -> ClientConfig {
        let non_empty = |s: &str| {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        };

        ClientConfig {
            grpc_enabled: self.grpc.enabled,
            address: self.server_address.clone(),
            grpc_address: self.grpc.address.clone(),
            http_timeout: Duration::from_secs(self.http_timeout_secs),
            grpc_timeout: Duration::from_secs(self.grpc.timeout_secs),
            max_retries: self.max_retries,
            grpc_max_retries: self.grpc.max_retries,
            signing_key: non_empty(&self.key),
            crypto_key: non_empty(&self.crypto_key).map(PathBuf::from),
            real_ip: non_empty(&self.real_ip),
            compress: self.compress,
            ..ClientConfig::default()
        }
    }
}
