use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use telemon_common::crypto::Encryptor;
use telemon_common::types::Metric;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::grpc::GrpcClient;
use crate::http::HttpClient;
use crate::retry::{RetryPolicy, DEFAULT_MAX_RETRIES};
use crate::MetricsTransport;

/// Plain values needed to construct a transport. Empty strings for the
/// optional fields are treated as "disabled".
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub grpc_enabled: bool,
    /// HTTP sink address, `host:port` or a full URL.
    pub address: String,
    pub grpc_address: String,
    pub http_timeout: Duration,
    pub grpc_timeout: Duration,
    pub max_retries: u32,
    pub grpc_max_retries: u32,
    pub retry_base_delay: Duration,
    /// HMAC key; enables request signing.
    pub signing_key: Option<String>,
    /// Public key PEM for HTTP payload encryption, or CA certificate for
    /// gRPC TLS.
    pub crypto_key: Option<PathBuf>,
    pub real_ip: Option<String>,
    pub compress: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            grpc_enabled: false,
            address: "localhost:8080".to_string(),
            grpc_address: "localhost:3200".to_string(),
            http_timeout: Duration::from_secs(10),
            grpc_timeout: Duration::from_secs(5),
            max_retries: DEFAULT_MAX_RETRIES,
            grpc_max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: Duration::from_secs(1),
            signing_key: None,
            crypto_key: None,
            real_ip: None,
            compress: true,
        }
    }
}

/// The transport chosen for the lifetime of the process.
pub enum TransportClient {
    Http(HttpClient),
    Grpc(GrpcClient),
}

impl TransportClient {
    pub fn protocol(&self) -> &'static str {
        match self {
            TransportClient::Http(_) => "http",
            TransportClient::Grpc(_) => "grpc",
        }
    }
}

/// Builds the configured transport. There is no fallback between the two.
///
/// `shutdown` interrupts retry waits. Must be called within a tokio runtime
/// when gRPC is enabled.
pub fn build_client(config: &ClientConfig, shutdown: CancellationToken) -> Result<TransportClient> {
    let crypto_key = config
        .crypto_key
        .as_ref()
        .filter(|path| !path.as_os_str().is_empty());
    let signing_key = config.signing_key.clone().filter(|k| !k.is_empty());
    let real_ip = config.real_ip.as_deref().filter(|ip| !ip.is_empty());

    if config.grpc_enabled {
        let client = GrpcClient::connect_lazy(
            &config.grpc_address,
            config.grpc_timeout,
            crypto_key.map(PathBuf::as_path),
            real_ip,
        )?
        .with_signing_key(signing_key)
        .with_retry_policy(RetryPolicy::new(config.grpc_max_retries, config.retry_base_delay))
        .with_shutdown(&shutdown);

        tracing::info!(
            address = %config.grpc_address,
            tls = crypto_key.is_some(),
            "Using gRPC transport"
        );
        return Ok(TransportClient::Grpc(client));
    }

    let encryptor = crypto_key.map(Encryptor::from_pem_file).transpose()?;
    let client = HttpClient::new(&config.address, config.http_timeout)?
        .with_signing_key(signing_key)
        .with_encryptor(encryptor)
        .with_compression(config.compress)
        .with_real_ip(real_ip.map(str::to_string))
        .with_retry_policy(RetryPolicy::new(config.max_retries, config.retry_base_delay))
        .with_shutdown(shutdown);

    tracing::info!(
        address = %client.base_url(),
        encrypted = crypto_key.is_some(),
        "Using HTTP transport"
    );
    Ok(TransportClient::Http(client))
}

#[async_trait]
impl MetricsTransport for TransportClient {
    async fn update_metric(&self, metric: &Metric) -> Result<()> {
        match self {
            TransportClient::Http(c) => c.update_metric(metric).await,
            TransportClient::Grpc(c) => c.update_metric(metric).await,
        }
    }

    async fn update_batch(&self, metrics: &[Metric]) -> Result<()> {
        match self {
            TransportClient::Http(c) => c.update_batch(metrics).await,
            TransportClient::Grpc(c) => c.update_batch(metrics).await,
        }
    }

    async fn stream_metrics(&self, metrics: &[Metric]) -> Result<()> {
        match self {
            TransportClient::Http(c) => c.stream_metrics(metrics).await,
            TransportClient::Grpc(c) => c.stream_metrics(metrics).await,
        }
    }

    fn supports_streaming(&self) -> bool {
        match self {
            TransportClient::Http(c) => c.supports_streaming(),
            TransportClient::Grpc(c) => c.supports_streaming(),
        }
    }

    async fn ping(&self) -> Result<()> {
        match self {
            TransportClient::Http(c) => c.ping().await,
            TransportClient::Grpc(c) => c.ping().await,
        }
    }

    async fn close(&self) -> Result<()> {
        match self {
            TransportClient::Http(c) => c.close().await,
            TransportClient::Grpc(c) => c.close().await,
        }
    }
}
