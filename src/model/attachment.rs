//! Attachment metadata.
//!
//! Only the description of an attachment part is kept; its content is dropped
//! once the decoded length is known.

use serde::{Deserialize, Serialize};

/// Metadata about one attachment-disposition part.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentMeta {
    /// Decoded filename, if the part declared one.
    pub filename: Option<String>,

    /// Declared MIME type, lowercased (e.g. `"application/pdf"`).
    pub content_type: Option<String>,

    /// Decoded payload length in bytes. `None` when the transfer encoding
    /// could not be decoded.
    #[serde(rename = "size")]
    pub size_bytes: Option<u64>,
}
