use crate::core::error::DictError;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Raw deflate, no zlib/gzip framing. Dictionary chunks use this on disk.
pub fn deflate(data: &[u8]) -> Result<Vec<u8>, DictError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub fn inflate(data: &[u8]) -> Result<Vec<u8>, DictError> {
    let mut out = Vec::new();
    DeflateDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| DictError::format(format!("inflate failed: {}", e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let data = b"apple\napricot\nbanana\n";
        let packed = deflate(data).unwrap();
        assert_eq!(inflate(&packed).unwrap(), data);
    }

    #[test]
    fn inflate_rejects_garbage() {
        let err = inflate(&[0xde, 0xad, 0xbe, 0xef, 0x01]).unwrap_err();
        assert!(matches!(err, DictError::Format { .. }));
    }
}
