//! Canonical serialization, checksums, gzip framing, and the binary wire
//! frame (spec §4.1 "Event Model & Codec", §6 "Wire encoding").

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};

/// Serializes `value` to canonical JSON bytes: keys at every object level
/// come out lexicographically sorted. We round-trip through `serde_json::Value`
/// first because that type's `Map` is `BTreeMap`-backed by default (the
/// `preserve_order` feature is not enabled anywhere in this workspace) —
/// serializing a struct directly would instead preserve field-declaration
/// order. The result is deterministic byte-for-byte across runs.
pub fn canonical_bytes<T: Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    let as_value = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&as_value)?)
}

/// First 16 hex characters of the SHA-256 digest of `bytes`.
pub fn checksum_hex16(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let full = format!("{:x}", digest);
    full[..16].to_string()
}

/// A value plus the checksum of its canonical encoding, ready for the wire.
#[derive(Debug, Clone)]
pub struct Checksummed {
    pub bytes: Vec<u8>,
    pub checksum: String,
}

pub fn encode<T: Serialize>(value: &T) -> CoreResult<Checksummed> {
    let bytes = canonical_bytes(value)?;
    let checksum = checksum_hex16(&bytes);
    Ok(Checksummed { bytes, checksum })
}

/// Decodes and verifies a checksummed payload, rejecting on mismatch or on
/// missing required fields (`serde` will fail to deserialize `Event`/
/// `Session` structs whose required fields are absent).
pub fn decode<T: DeserializeOwned>(bytes: &[u8], expected_checksum: &str) -> CoreResult<T> {
    let actual = checksum_hex16(bytes);
    if actual != expected_checksum {
        return Err(CoreError::ChecksumMismatch {
            expected: expected_checksum.to_string(),
            actual,
        });
    }
    serde_json::from_slice(bytes).map_err(|e| CoreError::InvalidEvent {
        message: e.to_string(),
    })
}

pub fn gzip_compress(bytes: &[u8]) -> CoreResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

pub fn gzip_decompress(bytes: &[u8]) -> CoreResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Rolling checksum used by the binary frame header: `(sum of bytes) mod 2^32`.
pub fn rolling_sum(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, b| acc.wrapping_add(*b as u32))
}

/// 4-byte LE type tag, 4-byte LE length, 4-byte LE rolling checksum, payload.
pub fn encode_frame(type_tag: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + payload.len());
    out.extend_from_slice(&type_tag.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&rolling_sum(payload).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

pub struct DecodedFrame {
    pub type_tag: u32,
    pub payload: Vec<u8>,
}

/// Decodes a binary frame, rejecting on length mismatch or checksum mismatch
/// (spec §6 "Reject on length mismatch or checksum mismatch").
pub fn decode_frame(bytes: &[u8]) -> CoreResult<DecodedFrame> {
    if bytes.len() < 12 {
        return Err(CoreError::FrameLengthMismatch {
            declared: 0,
            actual: bytes.len(),
        });
    }
    let type_tag = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let declared_len = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
    let declared_checksum = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
    let payload = &bytes[12..];

    if payload.len() != declared_len {
        return Err(CoreError::FrameLengthMismatch {
            declared: declared_len,
            actual: payload.len(),
        });
    }

    let actual_checksum = rolling_sum(payload);
    if actual_checksum != declared_checksum {
        return Err(CoreError::ChecksumMismatch {
            expected: declared_checksum.to_string(),
            actual: actual_checksum.to_string(),
        });
    }

    Ok(DecodedFrame {
        type_tag,
        payload: payload.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn checksum_is_stable_for_equal_bytes() {
        let a = checksum_hex16(b"hello world");
        let b = checksum_hex16(b"hello world");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn decode_rejects_tampered_bytes() {
        let encoded = encode(&json!({"a": 1, "b": 2})).unwrap();
        let err = decode::<serde_json::Value>(b"{\"a\":1,\"b\":3}", &encoded.checksum).unwrap_err();
        assert!(matches!(err, CoreError::ChecksumMismatch { .. }));
    }

    #[test]
    fn canonical_bytes_sort_top_level_keys() {
        let value = json!({"z": 1, "a": 2, "m": 3});
        let bytes = canonical_bytes(&value).unwrap();
        let s = String::from_utf8(bytes).unwrap();
        assert_eq!(s, r#"{"a":2,"m":3,"z":1}"#);
    }

    #[test]
    fn gzip_round_trips() {
        let original = b"some reasonably compressible payload payload payload";
        let compressed = gzip_compress(original).unwrap();
        let decompressed = gzip_decompress(&compressed).unwrap();
        assert_eq!(decompressed, original);
    }

    #[test]
    fn frame_round_trips() {
        let frame = encode_frame(7, b"payload-bytes");
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.type_tag, 7);
        assert_eq!(decoded.payload, b"payload-bytes");
    }

    #[test]
    fn frame_rejects_length_mismatch() {
        let mut frame = encode_frame(1, b"abc");
        frame.truncate(frame.len() - 1);
        let err = decode_frame(&frame).unwrap_err();
        assert!(matches!(err, CoreError::FrameLengthMismatch { .. }));
    }
}
