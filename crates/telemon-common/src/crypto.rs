//! RSA-OAEP encryption for payloads of any length.
//!
//! RSA can only encrypt messages shorter than `k - 2*hLen - 2` bytes (`k` is
//! the modulus size, `hLen` the OAEP hash size), so the plaintext is split
//! into chunks of that size and each chunk is encrypted independently.
//!
//! Frame layout, all integers big-endian:
//!
//! ```text
//! u32 chunk_count
//! repeat chunk_count times:
//!     u32 chunk_len
//!     [u8; chunk_len] ciphertext
//! ```
//!
//! Decoding is strictly sequential and preserves chunk order.

use std::path::Path;

use bytes::{Buf, BufMut, BytesMut};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

pub type Result<T> = std::result::Result<T, CryptoError>;

const LEN_PREFIX: usize = 4;

fn read_pem(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| CryptoError::KeyFile {
        path: path.display().to_string(),
        source,
    })
}

/// Largest plaintext chunk OAEP-SHA256 can encrypt with a `modulus_bytes` key.
pub fn max_chunk_size(modulus_bytes: usize) -> usize {
    modulus_bytes.saturating_sub(2 * <Sha256 as Digest>::output_size() + 2)
}

/// Encrypts payloads with an RSA public key.
#[derive(Debug, Clone)]
pub struct Encryptor {
    key: RsaPublicKey,
}

impl Encryptor {
    pub fn new(key: RsaPublicKey) -> Self {
        Self { key }
    }

    /// Parses a `PUBLIC KEY` (SPKI) or `RSA PUBLIC KEY` (PKCS#1) PEM document.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self::new(key))
    }

    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_pem(&read_pem(path.as_ref())?)
    }

    /// Plaintext bytes that fit into one chunk for this key.
    pub fn chunk_size(&self) -> usize {
        max_chunk_size(self.key.size())
    }

    /// Encrypts `plaintext` into a chunked frame.
    ///
    /// An empty plaintext produces a frame with a zero chunk count.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let chunk_size = self.chunk_size();
        if chunk_size == 0 {
            return Err(CryptoError::InvalidKey(format!(
                "{}-bit key is too small for OAEP-SHA256",
                self.key.size() * 8
            )));
        }

        let chunk_count = plaintext.len().div_ceil(chunk_size);
        let header = u32::try_from(chunk_count).map_err(|_| CryptoError::TooManyChunks(chunk_count))?;

        let mut frame = BytesMut::with_capacity(LEN_PREFIX + chunk_count * (LEN_PREFIX + self.key.size()));
        frame.put_u32(header);

        let mut rng = rand::thread_rng();
        for (index, chunk) in plaintext.chunks(chunk_size).enumerate() {
            let ciphertext = self
                .key
                .encrypt(&mut rng, Oaep::new::<Sha256>(), chunk)
                .map_err(|source| CryptoError::Encrypt { chunk: index, source })?;
            // Ciphertext length equals the modulus size, far below u32::MAX.
            frame.put_u32(ciphertext.len() as u32);
            frame.put_slice(&ciphertext);
        }

        Ok(frame.to_vec())
    }
}

/// Decrypts chunked frames with an RSA private key.
#[derive(Debug, Clone)]
pub struct Decryptor {
    key: RsaPrivateKey,
}

impl Decryptor {
    pub fn new(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    /// Parses a `PRIVATE KEY` (PKCS#8) or `RSA PRIVATE KEY` (PKCS#1) PEM document.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self::new(key))
    }

    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_pem(&read_pem(path.as_ref())?)
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.key.to_public_key()
    }

    /// Reassembles the plaintext from a frame produced by [`Encryptor::encrypt`].
    pub fn decrypt(&self, frame: &[u8]) -> Result<Vec<u8>> {
        let mut buf = frame;
        let chunk_count = read_u32(&mut buf, 0)? as usize;

        // The header is untrusted: every chunk needs a prefix and at least one
        // byte, and capacity is bounded by what the frame can actually hold.
        let needed = chunk_count.saturating_mul(LEN_PREFIX + 1);
        if needed > buf.remaining() {
            return Err(CryptoError::Truncated {
                chunk: 0,
                needed,
                available: buf.remaining(),
            });
        }
        let fits = buf.remaining() / (LEN_PREFIX + self.key.size());
        let mut plaintext = Vec::with_capacity(chunk_count.min(fits) * max_chunk_size(self.key.size()));
        for index in 0..chunk_count {
            let len = read_u32(&mut buf, index)? as usize;
            if buf.remaining() < len {
                return Err(CryptoError::Truncated {
                    chunk: index,
                    needed: len,
                    available: buf.remaining(),
                });
            }
            let decrypted = self
                .key
                .decrypt(Oaep::new::<Sha256>(), &buf[..len])
                .map_err(|source| CryptoError::Decrypt { chunk: index, source })?;
            plaintext.extend_from_slice(&decrypted);
            buf.advance(len);
        }

        Ok(plaintext)
    }
}

/// Reads the chunk count from a frame header without decrypting anything.
pub fn frame_chunk_count(frame: &[u8]) -> Result<u32> {
    let mut buf = frame;
    read_u32(&mut buf, 0)
}

fn read_u32(buf: &mut &[u8], chunk: usize) -> Result<u32> {
    if buf.remaining() < LEN_PREFIX {
        return Err(CryptoError::Truncated {
            chunk,
            needed: LEN_PREFIX,
            available: buf.remaining(),
        });
    }
    Ok(buf.get_u32())
}
