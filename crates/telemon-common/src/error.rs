/// Errors raised by the chunked RSA payload codec.
///
/// # Examples
///
/// ```rust
/// use telemon_common::error::CryptoError;
///
/// let err = CryptoError::Truncated { chunk: 2, needed: 256, available: 10 };
/// assert!(err.to_string().contains("chunk 2"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The key file could not be read.
    #[error("failed to read key file {path}: {source}")]
    KeyFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The PEM content is not a supported RSA key.
    #[error("invalid RSA key: {0}")]
    InvalidKey(String),

    /// A chunk could not be encrypted.
    #[error("failed to encrypt chunk {chunk}: {source}")]
    Encrypt {
        chunk: usize,
        #[source]
        source: rsa::Error,
    },

    /// A chunk failed OAEP decryption (wrong key or corrupted bytes).
    #[error("failed to decrypt chunk {chunk}: {source}")]
    Decrypt {
        chunk: usize,
        #[source]
        source: rsa::Error,
    },

    /// The frame ended before a length prefix or chunk body was complete.
    #[error("truncated frame at chunk {chunk}: need {needed} bytes, {available} available")]
    Truncated {
        chunk: usize,
        needed: usize,
        available: usize,
    },

    /// The payload needs more chunks than the u32 header can express.
    #[error("payload too large: {0} chunks")]
    TooManyChunks(usize),
}

/// Signature verification failure.
///
/// Both the received and the locally computed signatures are kept so callers
/// can log them side by side.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid signature: received {received}, computed {computed}")]
pub struct SignatureError {
    pub received: String,
    pub computed: String,
}
