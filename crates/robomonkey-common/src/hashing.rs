//! Content hashing for files and chunks
//!
//! Every content identity in robomonkey is a truncated hex SHA-256. The
//! truncation length is part of the storage contract: file rows, chunk rows
//! and embedder dedupe all compare these 16-char strings.

use sha2::{Digest, Sha256};

/// Number of hex characters kept from the SHA-256 digest.
pub const CONTENT_HASH_LEN: usize = 16;

/// Hash content to a 16-hex-char truncated SHA-256.
///
/// Deterministic for byte-identical input, which is what makes the
/// unchanged-file short-circuit and the embedder dedupe correct.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let full = format!("{:x}", hasher.finalize());
    full[..CONTENT_HASH_LEN].to_string()
}
