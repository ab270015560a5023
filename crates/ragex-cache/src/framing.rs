use ragex_core::{now_ts, CacheMetadata, RagexError, Result};

/// `[MAGIC(4) | VERSION(u16) | METADATA_LEN(u32) | METADATA_BYTES | PAYLOAD]`
/// (§4.1). `PAYLOAD` is zstd-compressed bincode. The version's low bit
/// reserved for a future alternate compression algorithm; this
/// implementation always writes zstd (version 1).
const MAGIC: &[u8; 4] = b"RAGX";
const VERSION: u16 = 1;

pub fn encode_frame(metadata: &CacheMetadata, payload: &[u8]) -> Result<Vec<u8>> {
    let compressed = zstd::encode_all(payload, 0).map_err(|e| RagexError::Io {
        path: "<in-memory>".into(),
        source: e,
    })?;
    let metadata_bytes = bincode::serde::encode_to_vec(metadata, bincode::config::standard())?;

    let mut out = Vec::with_capacity(4 + 2 + 4 + metadata_bytes.len() + compressed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&(metadata_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&metadata_bytes);
    out.extend_from_slice(&compressed);
    Ok(out)
}

pub struct DecodedFrame {
    pub metadata: CacheMetadata,
    pub payload: Vec<u8>,
}

/// Reads and validates the header, decompresses the payload. Never
/// panics on malformed input: every short-read/mismatch is a structured
/// `Integrity` error so callers can treat the cache as absent (§4.1
/// failure semantics).
pub fn decode_frame(bytes: &[u8]) -> Result<DecodedFrame> {
    if bytes.len() < 10 {
        return Err(RagexError::Integrity("frame too short".into()));
    }
    if &bytes[0..4] != MAGIC {
        return Err(RagexError::Integrity("bad magic".into()));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != VERSION {
        return Err(RagexError::Integrity(format!(
            "unsupported cache version {version}"
        )));
    }
    let metadata_len = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
    let metadata_start = 10;
    let metadata_end = metadata_start
        .checked_add(metadata_len)
        .ok_or_else(|| RagexError::Integrity("metadata length overflow".into()))?;
    if bytes.len() < metadata_end {
        return Err(RagexError::Integrity("truncated metadata".into()));
    }
    let (metadata, _): (CacheMetadata, usize) =
        bincode::serde::decode_from_slice(&bytes[metadata_start..metadata_end], bincode::config::standard())?;

    let payload = zstd::decode_all(&bytes[metadata_end..]).map_err(|e| {
        RagexError::Integrity(format!("payload decompression failed: {e}"))
    })?;

    Ok(DecodedFrame { metadata, payload })
}

/// Reads only the header far enough to validate magic/version, without
/// decompressing the payload (§4.1 `cache_valid()`).
pub fn header_only_valid(bytes: &[u8]) -> bool {
    bytes.len() >= 10 && &bytes[0..4] == MAGIC && u16::from_le_bytes([bytes[4], bytes[5]]) == VERSION
}

pub fn blank_metadata(dimensions: u16, entity_count: u32) -> CacheMetadata {
    CacheMetadata {
        version: VERSION,
        model_id: String::new(),
        model_repo: String::new(),
        dimensions,
        timestamp: now_ts(),
        entity_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_round_trips_payload_and_metadata() {
        let meta = blank_metadata(384, 10);
        let payload = b"hello world".to_vec();
        let frame = encode_frame(&meta, &payload).unwrap();
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.payload, payload);
        assert_eq!(decoded.metadata.dimensions, 384);
    }

    #[test]
    fn corrupt_magic_is_integrity_error_not_panic() {
        let meta = blank_metadata(0, 0);
        let mut frame = encode_frame(&meta, b"x").unwrap();
        frame[0] = b'Z';
        assert!(decode_frame(&frame).is_err());
    }

    #[test]
    fn truncated_frame_is_integrity_error() {
        assert!(decode_frame(&[1, 2, 3]).is_err());
    }

    #[test]
    fn header_only_valid_detects_bad_magic_without_decompressing() {
        let meta = blank_metadata(0, 0);
        let frame = encode_frame(&meta, b"x").unwrap();
        assert!(header_only_valid(&frame));
        assert!(!header_only_valid(b"nope"));
    }
}
