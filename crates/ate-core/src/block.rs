//! IEEE 488.2 definite-length arbitrary block data.
//!
//! Binary queries (trace and waveform dumps) answer with
//! `#<n><length digits><payload>`, where `<n>` is a single digit giving the
//! number of length digits that follow. A trailing line terminator may follow
//! the payload and is not part of the block.

use crate::error::{TransportError, TransportResult};
use bytes::{BufMut, Bytes, BytesMut};

/// Parsed block header: where the payload starts and how long it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Bytes taken by `#`, the digit count and the length digits.
    pub header_len: usize,
    /// Payload length announced by the header.
    pub payload_len: usize,
}

/// Parse the header at the start of `data`.
///
/// Fails with a protocol error if the header is malformed. Indefinite blocks
/// (`#0`) are not accepted.
pub fn parse_header(data: &[u8]) -> TransportResult<BlockHeader> {
    if data.first() != Some(&b'#') {
        return Err(TransportError::protocol(
            "binary block does not start with '#'",
        ));
    }
    let digit_count = data
        .get(1)
        .and_then(|b| (*b as char).to_digit(10))
        .ok_or_else(|| TransportError::protocol("binary block missing digit count"))?
        as usize;
    if digit_count == 0 {
        return Err(TransportError::protocol(
            "indefinite-length blocks are not supported",
        ));
    }
    let digits = data
        .get(2..2 + digit_count)
        .ok_or_else(|| TransportError::protocol("binary block header truncated"))?;
    let text = std::str::from_utf8(digits)
        .map_err(|_| TransportError::protocol("binary block length is not ASCII"))?;
    let payload_len = text
        .parse::<usize>()
        .map_err(|_| TransportError::protocol(format!("invalid block length '{}'", text)))?;

    Ok(BlockHeader {
        header_len: 2 + digit_count,
        payload_len,
    })
}

/// Extract the payload of a complete block held in memory.
pub fn decode(data: &[u8]) -> TransportResult<Bytes> {
    let header = parse_header(data)?;
    let end = header.header_len + header.payload_len;
    let payload = data.get(header.header_len..end).ok_or_else(|| {
        TransportError::protocol(format!(
            "binary block truncated: expected {} payload bytes, got {}",
            header.payload_len,
            data.len().saturating_sub(header.header_len)
        ))
    })?;
    Ok(Bytes::copy_from_slice(payload))
}

/// Wrap `payload` in a definite-length block header.
pub fn encode(payload: &[u8]) -> Bytes {
    let len = payload.len().to_string();
    let mut out = BytesMut::with_capacity(2 + len.len() + payload.len());
    out.put_u8(b'#');
    out.put_slice(len.len().to_string().as_bytes());
    out.put_slice(len.as_bytes());
    out.put_slice(payload);
    out.freeze()
}

/// Little-endian `f32` samples as a block payload.
pub fn encode_f32_le<I: IntoIterator<Item = f32>>(samples: I) -> Bytes {
    let mut payload = BytesMut::new();
    for sample in samples {
        payload.put_f32_le(sample);
    }
    payload.freeze()
}

/// Read a payload as little-endian `f32` samples. `None` if the length is not a
/// multiple of four.
pub fn decode_f32_le(payload: &[u8]) -> Option<Vec<f32>> {
    if payload.len() % 4 != 0 {
        return None;
    }
    Some(
        payload
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportErrorKind;

    #[test]
    fn test_decode_with_trailing_terminator() {
        let payload = decode(b"#15hello\n").unwrap();
        assert_eq!(&payload[..], b"hello");
    }

    #[test]
    fn test_encode_header_shape() {
        let block = encode(&[0u8; 1200]);
        assert_eq!(&block[..6], b"#41200");
        assert_eq!(block.len(), 6 + 1200);
        assert_eq!(decode(&block).unwrap().len(), 1200);
    }

    #[test]
    fn test_malformed_blocks_are_protocol_errors() {
        for bad in [&b"15hello"[..], b"#", b"#0", b"#3ab", b"#210abc"] {
            let err = decode(bad).unwrap_err();
            assert_eq!(err.kind, TransportErrorKind::Protocol, "input {:?}", bad);
        }
    }

    #[test]
    fn test_f32_samples() {
        let payload = encode_f32_le([1.0f32, -2.5, 1e-3]);
        assert_eq!(payload.len(), 12);
        assert_eq!(decode_f32_le(&payload).unwrap(), vec![1.0, -2.5, 1e-3]);
        assert!(decode_f32_le(&payload[..7]).is_none());
    }
}
