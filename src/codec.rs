//! Embedding <-> SQLite BLOB encoding.

use crate::error::MemoryError;

const F32_BYTES: usize = std::mem::size_of::<f32>();

/// Serialize an f32 vector to bytes (little-endian) for SQLite BLOB storage.
pub fn encode(v: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(v.len() * F32_BYTES);
    for &f in v {
        buf.extend_from_slice(&f.to_le_bytes());
    }
    buf
}

/// Deserialize bytes back to an f32 vector of exactly `dim` components.
/// Any other length is an error; nothing is padded or truncated.
pub fn decode(b: &[u8], dim: usize) -> Result<Vec<f32>, MemoryError> {
    let expected = dim * F32_BYTES;
    if b.len() != expected {
        return Err(MemoryError::Decode { expected, actual: b.len() });
    }
    Ok(b.chunks_exact(F32_BYTES)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_exact() {
        let original: Vec<f32> = vec![1.0, -2.5, 3.125, 0.0, -0.0, f32::MAX, f32::MIN_POSITIVE];
        let decoded = decode(&encode(&original), original.len()).unwrap();
        let bits = |v: &[f32]| v.iter().map(|f| f.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&original), bits(&decoded));
    }

    #[test]
    fn roundtrip_full_dimension() {
        let original: Vec<f32> = (0..384).map(|i| (i as f32 * 0.37).sin()).collect();
        assert_eq!(decode(&encode(&original), 384).unwrap(), original);
    }

    #[test]
    fn nan_payload_survives() {
        let nan = f32::from_bits(0x7fc0_1234);
        let decoded = decode(&encode(&[nan]), 1).unwrap();
        assert_eq!(decoded[0].to_bits(), 0x7fc0_1234);
    }

    #[test]
    fn short_blob_rejected() {
        let bytes = encode(&[1.0, 2.0, 3.0]);
        let err = decode(&bytes, 4).unwrap_err();
        assert!(matches!(err, MemoryError::Decode { expected: 16, actual: 12 }));
    }

    #[test]
    fn long_blob_rejected_not_truncated() {
        let bytes = encode(&[1.0, 2.0, 3.0]);
        assert!(decode(&bytes, 2).is_err());
    }

    #[test]
    fn ragged_blob_rejected() {
        let mut bytes = encode(&[1.0, 2.0]);
        bytes.push(0);
        assert!(decode(&bytes, 2).is_err());
    }
}
