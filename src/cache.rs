//! Versioned bytecode cache blobs.
//!
//! Layout: 4-byte magic, little-endian u16 format version, length-prefixed
//! build tag, then the postcard-serialized chunk. Any header mismatch or
//! undecodable body fails with [`HostError::CacheVersionMismatch`] so the
//! caller can fall back to compiling from source; a cache blob can never
//! crash the host.

use crate::compiler::Chunk;
use crate::error::HostError;

pub const CACHE_MAGIC: [u8; 4] = *b"JSHC";
pub const CACHE_FORMAT_VERSION: u16 = 2;

/// Build identity baked into every blob. Blobs do not transfer between
/// host versions.
pub fn build_tag() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Serialize a compiled chunk into a cache blob.
pub fn encode(chunk: &Chunk) -> Result<Vec<u8>, HostError> {
    let body = postcard::to_allocvec(chunk)
        .map_err(|e| HostError::Internal(format!("bytecode serialization failed: {}", e)))?;
    let tag = build_tag().as_bytes();
    let mut blob = Vec::with_capacity(4 + 2 + 1 + tag.len() + body.len());
    blob.extend_from_slice(&CACHE_MAGIC);
    blob.extend_from_slice(&CACHE_FORMAT_VERSION.to_le_bytes());
    blob.push(tag.len() as u8);
    blob.extend_from_slice(tag);
    blob.extend_from_slice(&body);
    Ok(blob)
}

/// Decode and validate a cache blob.
pub fn decode(blob: &[u8]) -> Result<Chunk, HostError> {
    let rest = match blob.strip_prefix(&CACHE_MAGIC) {
        Some(rest) => rest,
        None => {
            return Err(mismatch(
                "bad magic",
                format!("{:02x?}", CACHE_MAGIC),
                format!("{:02x?}", blob.get(..4).unwrap_or(blob)),
            ));
        }
    };

    let (version_bytes, rest) = split_at(rest, 2, "truncated header")?;
    let version = u16::from_le_bytes([
        version_bytes.first().copied().unwrap_or(0),
        version_bytes.get(1).copied().unwrap_or(0),
    ]);
    if version != CACHE_FORMAT_VERSION {
        return Err(mismatch(
            "format version mismatch",
            CACHE_FORMAT_VERSION.to_string(),
            version.to_string(),
        ));
    }

    let (tag_len, rest) = split_at(rest, 1, "truncated header")?;
    let tag_len = tag_len.first().copied().unwrap_or(0) as usize;
    let (tag, body) = split_at(rest, tag_len, "truncated build tag")?;
    let tag = std::str::from_utf8(tag)
        .map_err(|_| mismatch("corrupt build tag", build_tag().to_string(), "<non-utf8>".to_string()))?;
    if tag != build_tag() {
        return Err(mismatch(
            "build tag mismatch",
            build_tag().to_string(),
            tag.to_string(),
        ));
    }

    postcard::from_bytes(body).map_err(|_| {
        mismatch(
            "undecodable bytecode body",
            CACHE_FORMAT_VERSION.to_string(),
            "corrupt".to_string(),
        )
    })
}

fn split_at<'a>(
    bytes: &'a [u8],
    mid: usize,
    reason: &'static str,
) -> Result<(&'a [u8], &'a [u8]), HostError> {
    if bytes.len() < mid {
        return Err(mismatch(reason, format!("{} bytes", mid), format!("{} bytes", bytes.len())));
    }
    Ok(bytes.split_at(mid))
}

fn mismatch(reason: &'static str, expected: String, found: String) -> HostError {
    tracing::debug!(reason, %expected, %found, "cache blob rejected");
    HostError::CacheVersionMismatch {
        reason,
        expected,
        found,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::compiler::compile_program;
    use crate::parser::Parser;

    fn compiled(source: &str) -> Chunk {
        let program = Parser::new(source).unwrap().parse_program().unwrap();
        compile_program(&program, "test.js").unwrap()
    }

    #[test]
    fn encode_decode_preserves_chunk() {
        let chunk = compiled("1 + 2");
        let blob = encode(&chunk).unwrap();
        let decoded = decode(&blob).unwrap();
        assert_eq!(decoded.code, chunk.code);
        assert_eq!(decoded.constants, chunk.constants);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut blob = encode(&compiled("1")).unwrap();
        blob[0] = b'X';
        assert!(matches!(
            decode(&blob),
            Err(HostError::CacheVersionMismatch { reason: "bad magic", .. })
        ));
    }

    #[test]
    fn format_version_mismatch_is_rejected() {
        let mut blob = encode(&compiled("1")).unwrap();
        blob[4] = blob[4].wrapping_add(1);
        assert!(matches!(
            decode(&blob),
            Err(HostError::CacheVersionMismatch {
                reason: "format version mismatch",
                ..
            })
        ));
    }

    #[test]
    fn build_tag_mismatch_is_rejected() {
        let mut blob = encode(&compiled("1")).unwrap();
        // Corrupt the first build tag byte.
        blob[7] = blob[7].wrapping_add(1);
        assert!(matches!(
            decode(&blob),
            Err(HostError::CacheVersionMismatch {
                reason: "build tag mismatch",
                ..
            })
        ));
    }

    #[test]
    fn truncated_blob_is_rejected_not_panicking() {
        let blob = encode(&compiled("1")).unwrap();
        for len in 0..blob.len().min(12) {
            assert!(decode(&blob[..len]).is_err());
        }
    }

    #[test]
    fn corrupt_body_is_rejected() {
        let mut blob = encode(&compiled("var x = 1; x")).unwrap();
        let last = blob.len() - 1;
        blob.truncate(last);
        assert!(matches!(
            decode(&blob),
            Err(HostError::CacheVersionMismatch { .. })
        ));
    }
}
