//! MIME decoding: raw message bytes → [`ParsedEmail`].
//!
//! Top-level headers go through [`crate::parser::header`]; the part tree is
//! walked with `mail-parser`, which already applies transfer and charset
//! decoding (lossy UTF-8 when a charset is unknown or broken).

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use mail_parser::{Message, MessageParser, MessagePart, MimeHeaders, PartType};
use regex::Regex;
use tracing::debug;

use crate::error::{FetchError, Result};
use crate::model::address::address_list;
use crate::model::attachment::AttachmentMeta;
use crate::model::mail::ParsedEmail;
use crate::parser::header::{parse_date, Headers};
use crate::parser::identity::identify;
use crate::reply::extract_latest;

/// Maximum depth for descending into embedded `message/rfc822` parts.
const MAX_DEPTH: usize = 10;

/// Snippet length in characters.
pub const SNIPPET_CHARS: usize = 200;

/// Decode one raw message into its canonical record.
///
/// `received_at` is the arrival timestamp from the message source and is
/// copied verbatim; the message's own `Date:` only feeds `sent_date`.
///
/// Fails with [`FetchError::Decode`] only when the bytes are not a message at
/// all (empty input, no header fields). Broken individual headers or parts
/// degrade to empty fields.
pub fn decode(raw_message: &[u8], received_at: DateTime<Utc>) -> Result<ParsedEmail> {
    let message_bytes = skip_from_line(raw_message);
    if message_bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(FetchError::Decode("empty message".into()));
    }

    let headers = Headers::parse(message_bytes);
    if headers.is_empty() {
        return Err(FetchError::Decode("no header fields found".into()));
    }

    let parsed = MessageParser::default()
        .parse(message_bytes)
        .ok_or_else(|| FetchError::Decode("unparsable MIME structure".into()))?;

    let identity = identify(raw_message, &headers);
    let subject = headers.decoded("subject");
    let from_address = headers.decoded("from");
    let to_addresses = headers
        .decoded("to")
        .map(|v| address_list(&v))
        .unwrap_or_default();
    let cc_addresses = headers
        .decoded("cc")
        .map(|v| address_list(&v))
        .unwrap_or_default();
    let sent_date = headers.raw("date").and_then(parse_date);

    let content = collect_content(&parsed);
    let body_text = content.body_text();
    let has_html = content.has_html;

    let snippet = body_text
        .as_deref()
        .map(|t| t.chars().take(SNIPPET_CHARS).collect());
    let body_text_latest = body_text.as_deref().map(extract_latest);
    let deal_tag = find_deal_tag(subject.as_deref(), body_text.as_deref());

    debug!(
        identity = %identity,
        parts = parsed.parts.len(),
        attachments = content.attachments.len(),
        has_html,
        "Decoded message"
    );

    Ok(ParsedEmail {
        identity,
        subject,
        from_address,
        to_addresses,
        cc_addresses,
        sent_date,
        received_at,
        snippet,
        body_text,
        body_text_latest,
        has_html,
        attachments: content.attachments,
        deal_tag,
    })
}

/// Body candidates and attachment metadata gathered from the part tree.
#[derive(Debug, Default)]
struct PartContent {
    plain: Vec<String>,
    html: Vec<String>,
    has_html: bool,
    attachments: Vec<AttachmentMeta>,
}

impl PartContent {
    /// All `text/plain` parts joined; otherwise the HTML parts rendered as text.
    fn body_text(&self) -> Option<String> {
        let text = if !self.plain.is_empty() {
            self.plain.join("\n").trim().to_string()
        } else if !self.html.is_empty() {
            html_to_text(&self.html.join("\n"))
        } else {
            return None;
        };
        (!text.is_empty()).then_some(text)
    }
}

fn collect_content(msg: &Message<'_>) -> PartContent {
    let mut content = PartContent::default();
    walk_parts(msg, 0, &mut content);
    content
}

/// Visit every part in document order.
fn walk_parts(msg: &Message<'_>, depth: usize, content: &mut PartContent) {
    for part in &msg.parts {
        if is_attachment(part) {
            content.attachments.push(attachment_meta(part));
            continue;
        }

        match &part.body {
            PartType::Text(text) if is_plain_text(part) => {
                if !text.is_empty() {
                    content.plain.push(text.to_string());
                }
            }
            PartType::Html(html) => {
                content.has_html = true;
                if !html.is_empty() {
                    content.html.push(html.to_string());
                }
            }
            PartType::Message(inner) if depth < MAX_DEPTH => {
                walk_parts(inner, depth + 1, content);
            }
            PartType::Message(_) => {
                debug!(depth, "Embedded message nested too deeply, skipping");
            }
            _ => {}
        }
    }
}

fn is_attachment(part: &MessagePart<'_>) -> bool {
    part.content_disposition()
        .is_some_and(|d| d.ctype().eq_ignore_ascii_case("attachment"))
}

/// `text/plain`, or a text part with no declared type (the RFC 2045 default).
fn is_plain_text(part: &MessagePart<'_>) -> bool {
    match part.content_type() {
        Some(ct) => {
            ct.ctype().eq_ignore_ascii_case("text")
                && ct.subtype().is_none_or(|s| s.eq_ignore_ascii_case("plain"))
        }
        None => true,
    }
}

fn attachment_meta(part: &MessagePart<'_>) -> AttachmentMeta {
    let content_type = part.content_type().map(|ct| {
        let main = ct.ctype().to_ascii_lowercase();
        match ct.subtype() {
            Some(sub) => format!("{main}/{}", sub.to_ascii_lowercase()),
            None => main,
        }
    });

    let size_bytes = if part.is_encoding_problem {
        None
    } else {
        Some(part.contents().len() as u64)
    };

    AttachmentMeta {
        filename: part.attachment_name().map(String::from),
        content_type,
        size_bytes,
    }
}

/// Find a `[Сделка:XXXXX]` code, subject first, then body.
pub fn find_deal_tag(subject: Option<&str>, body_text: Option<&str>) -> Option<String> {
    static DEAL_TAG: OnceLock<Regex> = OnceLock::new();
    let re = DEAL_TAG
        .get_or_init(|| Regex::new(r"\[Сделка:([A-Za-z0-9]{4,6})\]").expect("valid deal tag regex"));

    [subject, body_text]
        .into_iter()
        .flatten()
        .find_map(|text| re.captures(text).map(|c| c[1].to_string()))
}

/// Skip a leading BOM and an MBOX `From ` separator line.
fn skip_from_line(data: &[u8]) -> &[u8] {
    let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);

    if data.starts_with(b"From ") {
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            return &data[pos + 1..];
        }
    }
    data
}

struct HtmlPatterns {
    hidden: Regex,
    block: Regex,
    tag: Regex,
    numeric_entity: Regex,
}

fn html_patterns() -> &'static HtmlPatterns {
    static PATTERNS: OnceLock<HtmlPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| HtmlPatterns {
        hidden: Regex::new(r"(?is)<(?:script|style|head)\b.*?</(?:script|style|head)\s*>")
            .expect("valid hidden-block regex"),
        block: Regex::new(
            r"(?i)<\s*/?\s*(?:br|p|div|tr|li|ul|ol|table|h[1-6]|blockquote|pre|hr)\b[^>]*>",
        )
        .expect("valid block-tag regex"),
        tag: Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"),
        numeric_entity: Regex::new(r"&#(?:[xX]([0-9a-fA-F]{1,6})|([0-9]{1,7}));")
            .expect("valid entity regex"),
    })
}

/// Convert HTML to plain text.
///
/// - Drops `<script>`, `<style>` and `<head>` blocks
/// - Turns block-level tags into line breaks, strips every other tag
/// - Decodes common named and all numeric entities
/// - Emits one trimmed, non-empty line per rendered line
pub fn html_to_text(html: &str) -> String {
    let p = html_patterns();

    let text = p.hidden.replace_all(html, "");
    let text = p.block.replace_all(&text, "\n");
    let text = p.tag.replace_all(&text, "");
    let text = decode_entities(&text);

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entities(text: &str) -> String {
    let numeric = html_patterns()
        .numeric_entity
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let code = match (caps.get(1), caps.get(2)) {
                (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
                (_, Some(dec)) => dec.as_str().parse().ok(),
                _ => None,
            };
            code.and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_default()
        });

    // `&amp;` last so "&amp;lt;" stays "&lt;"
    numeric
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
