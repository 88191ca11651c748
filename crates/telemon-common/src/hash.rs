//! HMAC-SHA256 signing of request payloads.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::SignatureError;

type HmacSha256 = Hmac<Sha256>;

fn mac(data: &[u8], key: &str) -> HmacSha256 {
    // HMAC accepts keys of any length; new_from_slice only fails for
    // fixed-size MACs.
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(data);
    mac
}

/// Signs `data` with `key`, returning the lowercase hex digest.
///
/// # Examples
///
/// ```
/// use telemon_common::hash::sign;
///
/// let sig = sign(b"payload", "secret");
/// assert_eq!(sig.len(), 64);
/// assert_eq!(sig, sign(b"payload", "secret"));
/// ```
pub fn sign(data: &[u8], key: &str) -> String {
    hex::encode(mac(data, key).finalize().into_bytes())
}

/// Verifies `signature` against `data` signed with `key`.
///
/// An empty `signature` is accepted and yields an empty computed value: the
/// receiver decides whether unsigned payloads are acceptable. On success the
/// computed signature is returned; on mismatch the error carries both values.
pub fn verify(data: &[u8], key: &str, signature: &str) -> Result<String, SignatureError> {
    if signature.is_empty() {
        return Ok(String::new());
    }

    let computed = sign(data, key);
    let matches = match hex::decode(signature) {
        Ok(received) => mac(data, key).verify_slice(&received).is_ok(),
        Err(_) => false,
    };

    if matches {
        Ok(computed)
    } else {
        Err(SignatureError {
            received: signature.to_string(),
            computed,
        })
    }
}
