//! Batch payload codec: up to 10 numeric samples per DATA frame, each
//! encoded as a narrow (scaled int32) or wide (raw f64) sample.

use crate::error::BatchError;

/// Samples whose `value * 1_000_000` doesn't fit an `i32` are kept at full
/// `f64` precision; this is the threshold the encoder checks per sample.
const SCALE: f64 = 1_000_000.0;

/// Encode `samples` (1..=10 values) into a batch payload.
///
/// Layout: `flag_count(1) || flag_indices(flag_count, 1-based) ||
/// samples...` where each sample is either a big-endian `i32` (narrow,
/// scaled by 1e6) or a big-endian `f64` (wide, for values whose scaled form
/// would overflow `i32`).
pub fn encode(samples: &[f64]) -> Result<Vec<u8>, BatchError> {
    if samples.is_empty() || samples.len() > 10 {
        return Err(BatchError::InvalidBatchCount(samples.len() as u8));
    }

    let mut wide_indices = Vec::new();
    for (i, &v) in samples.iter().enumerate() {
        if !fits_narrow(v) {
            wide_indices.push((i + 1) as u8);
        }
    }

    let mut out = Vec::with_capacity(1 + wide_indices.len() + samples.len() * 8);
    out.push(wide_indices.len() as u8);
    out.extend_from_slice(&wide_indices);

    let wide: std::collections::HashSet<u8> = wide_indices.iter().copied().collect();
    for (i, &v) in samples.iter().enumerate() {
        if wide.contains(&((i + 1) as u8)) {
            out.extend_from_slice(&v.to_be_bytes());
        } else {
            let scaled = (v * SCALE).trunc() as i32;
            out.extend_from_slice(&scaled.to_be_bytes());
        }
    }

    Ok(out)
}

fn fits_narrow(v: f64) -> bool {
    let scaled = (v * SCALE).trunc();
    scaled >= i32::MIN as f64 && scaled <= i32::MAX as f64
}

/// Decode a batch payload of `n` samples, given `n` from the frame's
/// `batch_count` field.
pub fn decode(payload: &[u8], n: u8) -> Result<Vec<f64>, BatchError> {
    if !(1..=10).contains(&n) {
        return Err(BatchError::InvalidBatchCount(n));
    }

    let mut cursor = 0usize;
    let flag_count = read_u8(payload, cursor)?;
    cursor += 1;

    let mut wide = std::collections::HashSet::new();
    for _ in 0..flag_count {
        wide.insert(read_u8(payload, cursor)?);
        cursor += 1;
    }

    let mut out = Vec::with_capacity(n as usize);
    for i in 1..=n {
        if wide.contains(&i) {
            let bytes = read_slice(payload, cursor, 8)?;
            cursor += 8;
            out.push(f64::from_be_bytes(bytes.try_into().unwrap()));
        } else {
            let bytes = read_slice(payload, cursor, 4)?;
            cursor += 4;
            let scaled = i32::from_be_bytes(bytes.try_into().unwrap());
            out.push(scaled as f64 / SCALE);
        }
    }

    Ok(out)
}

fn read_u8(payload: &[u8], at: usize) -> Result<u8, BatchError> {
    payload.get(at).copied().ok_or(BatchError::PayloadTruncated {
        needed: 1,
        available: payload.len().saturating_sub(at),
    })
}

fn read_slice(payload: &[u8], at: usize, len: usize) -> Result<&[u8], BatchError> {
    payload
        .get(at..at + len)
        .ok_or(BatchError::PayloadTruncated {
            needed: len,
            available: payload.len().saturating_sub(at),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_round_trip() {
        let samples = vec![1.5, -2.25, 0.0, 99.999999];
        let encoded = encode(&samples).unwrap();
        // 1 flag-count byte + 0 flag indices + 4 * 4 bytes
        assert_eq!(encoded.len(), 1 + 0 + 4 * 4);
        let decoded = decode(&encoded, samples.len() as u8).unwrap();
        for (a, b) in samples.iter().zip(decoded.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn wide_round_trip_exact() {
        // A value whose *1e6 scaled form overflows i32.
        let huge = 1.0e10;
        let samples = vec![huge, 1.0];
        let encoded = encode(&samples).unwrap();
        let decoded = decode(&encoded, samples.len() as u8).unwrap();
        assert_eq!(decoded[0], huge);
        assert!((decoded[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn flags_identify_wide_samples_by_one_based_index() {
        let samples = vec![1.0, 1.0e10, 1.0, 1.0e10];
        let encoded = encode(&samples).unwrap();
        assert_eq!(encoded[0], 2); // flag_count
        assert_eq!(&encoded[1..3], &[2, 4]); // 1-based indices of the wide ones
    }

    #[test]
    fn size_bound_is_enforced_by_caller() {
        // 10 wide samples: 1 + 10 + 10*8 = 91 bytes, well under 190.
        let samples = vec![1.0e10; 10];
        let encoded = encode(&samples).unwrap();
        assert!(encoded.len() <= 190);
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(encode(&[]).is_err());
    }

    #[test]
    fn too_many_samples_is_rejected() {
        let samples = vec![1.0; 11];
        assert!(encode(&samples).is_err());
    }

    #[test]
    fn truncated_payload_is_detected() {
        let err = decode(&[0], 3).unwrap_err();
        assert!(matches!(err, BatchError::PayloadTruncated { .. }));
    }

    #[test]
    fn decoded_length_matches_n_exactly() {
        let samples = vec![1.0, 2.0, 3.0];
        let encoded = encode(&samples).unwrap();
        let decoded = decode(&encoded, 3).unwrap();
        assert_eq!(decoded.len(), 3);
    }
}
