//! Stable per-message identity used as the deduplication key.

use sha2::{Digest, Sha256};

use crate::parser::header::Headers;

/// Prefix of content-hash identities.
pub const HASH_PREFIX: &str = "sha256:";

/// Derive the identity key of a message.
///
/// The decoded, trimmed `Message-ID` header is used verbatim (brackets
/// included) so it can be correlated with other systems. Without one, the key
/// is `sha256:<hex>` over the complete raw bytes.
pub fn identify(raw_message: &[u8], headers: &Headers) -> String {
    if let Some(id) = headers.decoded("message-id") {
        let id = id.trim();
        if !id.is_empty() {
            return id.to_string();
        }
    }
    content_hash(raw_message)
}

/// `sha256:` followed by the lowercase hex digest of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{HASH_PREFIX}{:x}", hasher.finalize())
}
