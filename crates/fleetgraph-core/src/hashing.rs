// crates/fleetgraph-core/src/hashing.rs
// ============================================================================
// Module: Fleetgraph Canonical Hashing
// Description: RFC 8785 JSON canonicalization and content hashing utilities.
// Purpose: Provide deterministic hashes for work-spec snapshots and tokens.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! `work_spec_hash` on a [`crate::model::TaskExecutionSnapshot`] and the
//! SHA-256 fingerprint stored against an [`crate::model::ApiKey`] both need a
//! deterministic digest over either structured JSON or raw bytes. RFC 8785
//! (JCS) canonicalization guarantees the JSON digest is stable regardless of
//! field insertion order.

use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

/// Errors raised while computing canonical hashes.
#[derive(Debug, Error)]
pub enum HashError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
}

/// Returns canonical JSON bytes for a serializable value per RFC 8785.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Hashes canonical JSON with SHA-256, returning a lowercase hex digest.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn hash_canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, HashError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(hash_bytes(&bytes))
}

/// Hashes raw bytes with SHA-256, returning a lowercase hex digest.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

/// Encodes bytes as a lowercase hex string. Visible within the crate so
/// callers that need raw hex (e.g. opaque id generation) need not hash
/// random bytes just to get a string representation of them.
pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::hash_bytes;
    use super::hash_canonical_json;
    use serde_json::json;

    #[test]
    fn hashing_raw_bytes_is_deterministic() {
        let digest_a = hash_bytes(b"hello");
        let digest_b = hash_bytes(b"hello");
        assert_eq!(digest_a, digest_b);
        assert_eq!(digest_a.len(), 64);
    }

    #[test]
    fn canonical_json_hash_ignores_field_order() {
        let a = json!({"objective": "x", "acceptance_criteria": ["y"]});
        let b = json!({"acceptance_criteria": ["y"], "objective": "x"});
        let digest_a = hash_canonical_json(&a).expect("hash a");
        let digest_b = hash_canonical_json(&b).expect("hash b");
        assert_eq!(digest_a, digest_b);
    }
}
