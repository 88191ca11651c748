//! Gzip helpers for HTTP bodies.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

pub fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

pub fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoded = Vec::new();
    GzDecoder::new(data).read_to_end(&mut decoded)?;
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repetitive_json_shrinks() {
        let body = r#"{"id":"CPUutilization1","type":"gauge","value":12.5}"#.repeat(50);
        let packed = gzip(body.as_bytes()).unwrap();
        assert!(packed.len() < body.len() / 4);
        assert_eq!(gunzip(&packed).unwrap(), body.as_bytes());
    }

    #[test]
    fn garbage_is_not_gzip() {
        assert!(gunzip(b"definitely not gzip").is_err());
    }
}
