//! Latest-reply extraction: cut quoted reply/forward history out of a body.
//!
//! The cut point is the earliest of two independent marker families:
//!
//! - **Reply headers**: a line opening with a locale's "On" word (optionally
//!   quote-prefixed) whose own line, or one of the next two, ends with a
//!   "wrote:" word. The cut is at the opener line.
//! - **Marker lines**: separators such as `-----Original Message-----`,
//!   forwarded-message banners, and header-block starters (`From: `, `От: `).
//!
//! Everything before the cut is the top part. Quote-prefixed lines are
//! removed from it; if nothing is left, the unstripped top part is returned
//! instead so callers still see the text.
//!
//! Locales are added by extending [`REPLY_LOCALES`] or [`MARKER_LINES`].

use std::sync::OnceLock;

use regex::Regex;

/// Words framing an "On <date>, <name> wrote:" line in one locale.
pub struct ReplyLocale {
    pub lang: &'static str,
    /// Literal word that must start the line.
    pub opener: &'static str,
    /// Regex that must end the line (or one of the next two).
    pub wrote: &'static str,
}

/// Reply-header words. Openers and "wrote" words are matched independently,
/// so a German opener followed by an English "wrote:" still counts.
pub const REPLY_LOCALES: &[ReplyLocale] = &[
    ReplyLocale { lang: "en", opener: "On", wrote: r"wrote:" },
    // "Am … schrieb:" and "Am … schrieb Name <addr>:"
    ReplyLocale { lang: "de", opener: "Am", wrote: r"schrieb(?:\s.*)?:" },
    ReplyLocale { lang: "fr", opener: "Le", wrote: r"écrit\s*:" },
    ReplyLocale { lang: "es", opener: "El", wrote: r"escribió\s*:" },
    ReplyLocale { lang: "it", opener: "Il", wrote: r"ha scritto\s*:" },
    ReplyLocale { lang: "pt", opener: "Em", wrote: r"escreveu\s*:" },
    ReplyLocale { lang: "nl", opener: "Op", wrote: r"schreef(?:\s.*)?:" },
    ReplyLocale { lang: "pl", opener: "W dniu", wrote: r"napisał\s*\(?a\)?\s*:" },
    ReplyLocale { lang: "ru", opener: "В", wrote: r"писал(?:а|\(а\))?\s*:" },
    ReplyLocale { lang: "el", opener: "Στις", wrote: r"έγραψε\s*:" },
];

/// A line pattern that starts quoted history wherever it appears.
pub struct MarkerLine {
    pub name: &'static str,
    /// Regex matched after an optional `>` quote prefix at a line start.
    pub pattern: &'static str,
}

pub const MARKER_LINES: &[MarkerLine] = &[
    // Outlook / Exchange, any number of dashes
    MarkerLine { name: "original-message", pattern: r"-+\s*Original Message\s*-+\s*$" },
    // Gmail, Yahoo, Thunderbird
    MarkerLine { name: "forwarded-separator", pattern: r"-+\s*Forwarded message\s*-+\s*$" },
    // Apple Mail, with or without the colon
    MarkerLine { name: "begin-forwarded", pattern: r"Begin forwarded message:?\s*$" },
    MarkerLine { name: "forwarded", pattern: r"Forwarded message\s*$" },
    // Bulgarian (ABV and others)
    MarkerLine { name: "bg-original-message", pattern: r"-+\s*Оригинално писмо\s*-+\s*$" },
    MarkerLine { name: "bg-forwarded", pattern: r"Препратено съобщение\s*$" },
    // Russian (Yandex, Mail.ru)
    MarkerLine { name: "ru-original-message", pattern: r"-+\s*Исходное сообщение\s*-+\s*$" },
    MarkerLine { name: "ru-forwarded", pattern: r"-+\s*Пересылаемое сообщение\s*-+\s*$" },
    // Reply header blocks (Outlook Web and many others)
    MarkerLine { name: "header-block", pattern: r"(?:From|Sent|To|Subject|Date):\s+" },
    MarkerLine { name: "bg-header-block", pattern: r"(?:От|До|Относно|Изпратено на):\s+" },
];

struct CompiledRules {
    opener: Regex,
    wrote: Regex,
    markers: Vec<(&'static str, Regex)>,
    blank_runs: Regex,
}

fn rules() -> &'static CompiledRules {
    static RULES: OnceLock<CompiledRules> = OnceLock::new();
    RULES.get_or_init(|| {
        let openers: Vec<String> = REPLY_LOCALES
            .iter()
            .map(|l| regex::escape(l.opener))
            .collect();
        let wrotes: Vec<&str> = REPLY_LOCALES.iter().map(|l| l.wrote).collect();

        CompiledRules {
            opener: Regex::new(&format!(r"(?i)^\s*>?\s*(?:{})\b", openers.join("|")))
                .expect("valid reply opener regex"),
            wrote: Regex::new(&format!(r"(?i)(?:{})\s*$", wrotes.join("|")))
                .expect("valid reply wrote regex"),
            markers: MARKER_LINES
                .iter()
                .map(|m| {
                    let re = Regex::new(&format!(r"(?im)^\s*>?\s*{}", m.pattern))
                        .expect("valid marker line regex");
                    (m.name, re)
                })
                .collect(),
            blank_runs: Regex::new(r"\n{3,}").expect("valid blank-run regex"),
        }
    })
}

/// Extract the newest human-written part of a message body.
///
/// Total: never fails, and returns an empty string for empty input.
pub fn extract_latest(body_text: &str) -> String {
    let text = normalize_newlines(body_text);
    let rules = rules();

    let top_part = match cut_point(&text) {
        Some(idx) => &text[..idx],
        None => text.as_str(),
    };

    let kept: Vec<&str> = top_part
        .split('\n')
        .filter(|line| !line.trim_start().starts_with('>'))
        .collect();
    let cleaned = kept.join("\n");
    let cleaned = rules.blank_runs.replace_all(cleaned.trim(), "\n\n");

    if cleaned.is_empty() {
        // Only quoted lines above the marker: hand back the top part as-is
        return rules
            .blank_runs
            .replace_all(top_part.trim(), "\n\n")
            .into_owned();
    }
    cleaned.into_owned()
}

/// Byte offset where quoted history starts, if any marker is present.
///
/// Expects `\n` line endings.
pub fn cut_point(text: &str) -> Option<usize> {
    let reply = find_reply_header(text);
    let marker = find_marker_line(text).map(|(_, idx)| idx);
    match (reply, marker) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Offset of the first line that opens an "On … wrote:" reply header.
fn find_reply_header(text: &str) -> Option<usize> {
    let rules = rules();
    let lines: Vec<&str> = text.split('\n').collect();

    let mut offset = 0;
    for (i, line) in lines.iter().enumerate() {
        let line_start = offset;
        offset += line.len() + 1;

        if !rules.opener.is_match(line) {
            continue;
        }
        let ends_with_wrote = lines[i..lines.len().min(i + 3)]
            .iter()
            .any(|l| rules.wrote.is_match(l.trim()));
        if ends_with_wrote {
            return Some(line_start);
        }
    }
    None
}

/// Earliest marker line as `(rule name, offset)`.
fn find_marker_line(text: &str) -> Option<(&'static str, usize)> {
    rules()
        .markers
        .iter()
        .filter_map(|(name, re)| re.find(text).map(|m| (*name, m.start())))
        .min_by_key(|(_, idx)| *idx)
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}
