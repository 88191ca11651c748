use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use telemon_common::crypto::Encryptor;
use telemon_common::types::Metric;
use telemon_common::{hash, ENCRYPTED_HEADER, REAL_IP_HEADER, SIGNATURE_HEADER};
use tokio_util::sync::CancellationToken;

use crate::compress;
use crate::error::{Result, TransportError};
use crate::retry::{self, RetryPolicy};
use crate::MetricsTransport;

/// Longest response body kept in a [`TransportError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Prefixes `http://` when the address has no scheme and drops trailing
/// slashes.
pub fn base_url(address: &str) -> String {
    let addr = address.trim().trim_end_matches('/');
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    }
}

/// A request body after signing, encryption and compression.
#[derive(Debug, Clone)]
struct PreparedBody {
    body: Bytes,
    signature: Option<String>,
    encrypted: bool,
    compressed: bool,
}

/// Posts metric batches as JSON arrays to `{base}/updates`.
pub struct HttpClient {
    client: Client,
    base_url: String,
    signing_key: Option<String>,
    encryptor: Option<Encryptor>,
    compress: bool,
    real_ip: Option<String>,
    retry: RetryPolicy,
    shutdown: CancellationToken,
}

impl HttpClient {
    /// Builds a client with compression on, no signing, no encryption and
    /// the default retry policy.
    pub fn new(address: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url(address),
            signing_key: None,
            encryptor: None,
            compress: true,
            real_ip: None,
            retry: RetryPolicy::default(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn with_signing_key(mut self, key: Option<String>) -> Self {
        self.signing_key = key.filter(|k| !k.is_empty());
        self
    }

    pub fn with_encryptor(mut self, encryptor: Option<Encryptor>) -> Self {
        self.encryptor = encryptor;
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compress = enabled;
        self
    }

    pub fn with_real_ip(mut self, real_ip: Option<String>) -> Self {
        self.real_ip = real_ip.filter(|ip| !ip.is_empty());
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Retry waits end early once `shutdown` is cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Signs the canonical JSON, then encrypts, then compresses.
    fn prepare(&self, metrics: &[Metric]) -> Result<PreparedBody> {
        let json = serde_json::to_vec(metrics)?;
        let signature = self.signing_key.as_deref().map(|key| hash::sign(&json, key));

        let (body, encrypted) = match &self.encryptor {
            Some(encryptor) => (encryptor.encrypt(&json)?, true),
            None => (json, false),
        };

        let (body, compressed) = if self.compress {
            (compress::gzip(&body).map_err(TransportError::Compress)?, true)
        } else {
            (body, false)
        };

        Ok(PreparedBody {
            body: Bytes::from(body),
            signature,
            encrypted,
            compressed,
        })
    }

    async fn post_once(&self, prepared: &PreparedBody, attempt: u32) -> Result<()> {
        let mut request = self
            .client
            .post(format!("{}/updates", self.base_url))
            .header(CONTENT_TYPE, "application/json");
        if let Some(signature) = &prepared.signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }
        if prepared.encrypted {
            request = request.header(ENCRYPTED_HEADER, "true");
        }
        if prepared.compressed {
            request = request.header(CONTENT_ENCODING, "gzip");
        }
        if let Some(ip) = &self.real_ip {
            request = request.header(REAL_IP_HEADER, ip);
        }

        let response = request.body(prepared.body.clone()).send().await?;
        let status = response.status();
        if status == StatusCode::OK {
            tracing::debug!(attempt, "Batch accepted");
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut end = MAX_ERROR_BODY;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body.truncate(end);
        }
        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl MetricsTransport for HttpClient {
    async fn update_batch(&self, metrics: &[Metric]) -> Result<()> {
        if metrics.is_empty() {
            return Ok(());
        }

        let prepared = self.prepare(metrics)?;
        let prepared = &prepared;
        retry::retry(&self.retry, &self.shutdown, TransportError::is_retriable, move |attempt| {
            self.post_once(prepared, attempt)
        })
        .await?;

        tracing::debug!(count = metrics.len(), "Metrics delivered over HTTP");
        Ok(())
    }

    async fn stream_metrics(&self, metrics: &[Metric]) -> Result<()> {
        if metrics.is_empty() {
            return Ok(());
        }
        Err(TransportError::NotSupported("http"))
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    async fn ping(&self) -> Result<()> {
        let response = self.client.get(format!("{}/ping", self.base_url)).send().await?;
        let status = response.status();
        if status == StatusCode::OK {
            Ok(())
        } else {
            Err(TransportError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
