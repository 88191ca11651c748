use std::io::ErrorKind;

use telemon_common::error::CryptoError;

/// Errors produced while delivering metrics.
///
/// # Examples
///
/// ```rust
/// use telemon_transport::error::TransportError;
///
/// let err = TransportError::Status { status: 503, body: "busy".to_string() };
/// assert!(err.is_retriable());
/// assert!(!TransportError::Status { status: 400, body: String::new() }.is_retriable());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The batch could not be serialized to JSON.
    #[error("failed to encode metrics: {0}")]
    Encode(#[from] serde_json::Error),

    /// Payload encryption failed, or the public key could not be loaded.
    #[error("failed to encrypt data: {0}")]
    Encrypt(#[from] CryptoError),

    #[error("failed to compress data: {0}")]
    Compress(#[source] std::io::Error),

    /// Network-level failure reported by `reqwest`.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The sink answered with something other than `200 OK`.
    #[error("server responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The gRPC call returned a non-OK status.
    #[error("gRPC call failed: {0}")]
    Grpc(#[from] tonic::Status),

    /// The gRPC channel could not be configured or established.
    #[error("gRPC transport error: {0}")]
    Channel(#[from] tonic::transport::Error),

    #[error("failed to read TLS certificate {path}: {source}")]
    Certificate {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The sink acknowledged the call with `success = false`.
    #[error("server rejected metrics: {0}")]
    Rejected(String),

    #[error("streaming is not supported by the {0} transport")]
    NotSupported(&'static str),

    #[error("operation cancelled")]
    Cancelled,

    #[error("client is closed")]
    Closed,

    /// Every allowed attempt failed with a retriable error.
    #[error("failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<TransportError>,
    },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

fn retriable_io(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::TimedOut
            | ErrorKind::UnexpectedEof
    )
}

/// Walks the source chain looking for a retriable I/O error.
fn retriable_source(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if retriable_io(io.kind()) {
                return true;
            }
            // io::Error::source skips the wrapped error itself.
            if let Some(inner) = io.get_ref() {
                current = Some(inner as &(dyn std::error::Error + 'static));
                continue;
            }
        }
        current = e.source();
    }
    false
}

impl TransportError {
    /// Whether the failure is transient and worth another attempt.
    ///
    /// Timeouts, connection and DNS failures, closed connections and server
    /// side 5xx/408/429 answers are transient. Encoding, crypto, client side
    /// 4xx and protocol rejections are not.
    pub fn is_retriable(&self) -> bool {
        match self {
            TransportError::Http(e) => e.is_timeout() || e.is_connect() || retriable_source(e),
            TransportError::Io(e) => retriable_io(e.kind()),
            TransportError::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            TransportError::Grpc(status) => matches!(
                status.code(),
                tonic::Code::Unavailable
                    | tonic::Code::DeadlineExceeded
                    | tonic::Code::ResourceExhausted
                    | tonic::Code::Aborted
            ),
            TransportError::Channel(_) => true,
            _ => false,
        }
    }

    /// Failures that end a retry loop regardless of the transport's policy.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransportError::Cancelled
                | TransportError::Closed
                | TransportError::NotSupported(_)
                | TransportError::Encode(_)
                | TransportError::Encrypt(_)
                | TransportError::Compress(_)
        )
    }
}
