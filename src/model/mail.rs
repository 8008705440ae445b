//! Core record and response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::attachment::AttachmentMeta;

/// Canonical record for one decoded message.
///
/// Built once per raw message and never mutated afterwards. Every field
/// except `identity` and `received_at` is best-effort: a missing or malformed
/// header yields `None` or an empty list, never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedEmail {
    /// Deduplication key: the trimmed `Message-ID`, or `sha256:<hex>` of the raw bytes.
    #[serde(rename = "messageId")]
    pub identity: String,

    /// Decoded subject line (RFC 2047 encoded-words resolved).
    pub subject: Option<String>,

    /// Decoded `From:` header value.
    #[serde(rename = "from")]
    pub from_address: Option<String>,

    /// Bare addresses from `To:`, in header order.
    #[serde(rename = "to")]
    pub to_addresses: Vec<String>,

    /// Bare addresses from `Cc:`, in header order.
    #[serde(rename = "cc")]
    pub cc_addresses: Vec<String>,

    /// The message's own `Date:` header, when it parses.
    #[serde(rename = "date")]
    pub sent_date: Option<DateTime<Utc>>,

    /// Arrival timestamp reported by the message source.
    pub received_at: DateTime<Utc>,

    /// First 200 characters of `body_text`.
    pub snippet: Option<String>,

    /// Best-effort plain-text body, quoted history included.
    pub body_text: Option<String>,

    /// `body_text` with quoted reply/forward history cut away.
    pub body_text_latest: Option<String>,

    /// Whether any `text/html` part was present.
    pub has_html: bool,

    /// One entry per attachment-disposition part, in document order.
    #[serde(rename = "attachmentsMeta")]
    pub attachments: Vec<AttachmentMeta>,

    /// Code from a `[Сделка:XXXXX]` marker in the subject or body.
    #[serde(rename = "dealId")]
    pub deal_tag: Option<String>,
}

/// Result of one batch over a time window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    /// Latest `received_at` among `items`, `None` when the batch is empty.
    pub most_recent_received_at: Option<DateTime<Utc>>,
    /// Number of accepted messages.
    pub count: usize,
    /// Accepted messages, in source order.
    pub items: Vec<ParsedEmail>,
}

impl FetchResponse {
    /// Build a response from accepted items, deriving `count` and the latest arrival.
    pub fn from_items(items: Vec<ParsedEmail>) -> Self {
        let most_recent_received_at = items.iter().map(|i| i.received_at).max();
        Self {
            most_recent_received_at,
            count: items.len(),
            items,
        }
    }
}
