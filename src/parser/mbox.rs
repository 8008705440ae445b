//! Streaming MBOX splitter.
//!
//! Reads MBOX files line-by-line with a large buffer and hands each message to
//! a callback together with its `From ` separator line. Tolerant of malformed
//! input.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

use crate::error::{FetchError, Result};

/// Size of the internal read buffer.
const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Default maximum message size in bytes (256 MB).
const MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// One message as found in the file.
#[derive(Debug, Clone, Copy)]
pub struct MboxEntry<'a> {
    /// Byte offset of the first byte after the separator line.
    pub offset: u64,
    /// The `From ` line, line ending included; empty for content that precedes
    /// any separator.
    pub separator: &'a [u8],
    /// Message bytes, separator excluded.
    pub message: &'a [u8],
}

/// Streaming MBOX parser.
///
/// Tolerant of:
///
/// - Mixed `\n` and `\r\n` line endings
/// - `From ` lines not preceded by a blank line (logs a warning)
/// - Truncated messages at EOF
/// - NUL bytes and other binary content in the body
/// - UTF-8 BOM at the start of the file
pub struct MboxParser {
    path: PathBuf,
    file_size: u64,
    max_message_size: usize,
}

impl MboxParser {
    /// Create a parser for the given MBOX file.
    ///
    /// Verifies that the file exists and is readable, but does NOT validate
    /// that it is actually an MBOX.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FetchError::FileNotFound(path.clone())
            } else {
                FetchError::io(&path, e)
            }
        })?;
        Ok(Self {
            path,
            file_size: metadata.len(),
            max_message_size: MAX_MESSAGE_SIZE,
        })
    }

    /// Total size of the underlying file in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Walk the file, calling `message_callback` for each message found.
    ///
    /// The callback returns `true` to continue or `false` to stop early.
    /// Returns the number of messages delivered.
    pub fn parse(&self, message_callback: &mut dyn FnMut(MboxEntry<'_>) -> bool) -> Result<u64> {
        if self.file_size == 0 {
            return Ok(0);
        }

        let file = File::open(&self.path).map_err(|e| FetchError::io(&self.path, e))?;
        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

        let mut count: u64 = 0;
        let mut current_offset: u64 = 0;
        let mut separator: Vec<u8> = Vec::new();
        let mut message_buf: Vec<u8> = Vec::with_capacity(64 * 1024);
        let mut message_start: u64 = 0;
        let mut oversized = false;
        let mut prev_line_was_empty = true;
        let mut first_line = true;

        let mut line_buf: Vec<u8> = Vec::with_capacity(4096);

        loop {
            line_buf.clear();
            let line_len = {
                let buf = reader
                    .fill_buf()
                    .map_err(|e| FetchError::io(&self.path, e))?;
                if buf.is_empty() {
                    break; // EOF
                }
                let consume_len = match memchr_newline(buf) {
                    Some(pos) => pos + 1,
                    None => buf.len(),
                };
                line_buf.extend_from_slice(&buf[..consume_len]);
                reader.consume(consume_len);
                consume_len as u64
            };

            if is_mbox_separator(&line_buf) {
                if !first_line && !prev_line_was_empty {
                    warn!(
                        offset = current_offset,
                        "Found 'From ' separator without preceding blank line"
                    );
                }
                if !separator.is_empty() || !message_buf.is_empty() {
                    let entry = MboxEntry {
                        offset: message_start,
                        separator: &separator,
                        message: &message_buf,
                    };
                    if !message_callback(entry) {
                        return Ok(count);
                    }
                    count += 1;
                }
                separator.clear();
                separator.extend_from_slice(&line_buf);
                message_buf.clear();
                message_start = current_offset + line_len;
                oversized = false;
            } else if message_buf.len() + line_buf.len() <= self.max_message_size {
                message_buf.extend_from_slice(&line_buf);
            } else if !oversized {
                oversized = true;
                warn!(
                    offset = message_start,
                    max_size = self.max_message_size,
                    "Message exceeds maximum size, truncating body"
                );
            }

            prev_line_was_empty = is_blank_line(&line_buf);
            first_line = false;
            current_offset += line_len;
        }

        // Flush last message
        if !separator.is_empty() || !message_buf.is_empty() {
            let entry = MboxEntry {
                offset: message_start,
                separator: &separator,
                message: &message_buf,
            };
            if message_callback(entry) {
                count += 1;
            }
        }

        Ok(count)
    }

    /// Read `length` bytes at `offset`, as recorded from an [`MboxEntry`].
    pub fn read_message_at(path: impl AsRef<Path>, offset: u64, length: u64) -> Result<Vec<u8>> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| FetchError::io(path, e))?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| FetchError::io(path, e))?;
        let mut buffer = vec![0u8; length as usize];
        file.read_exact(&mut buffer)
            .map_err(|e| FetchError::io(path, e))?;
        Ok(buffer)
    }
}

/// Delivery timestamp from a separator line such as
/// `From sender@example.com Sun Dec 28 14:04:00 2025`.
///
/// Accepts asctime with an optional numeric zone before the year, and ignores
/// a weekday that does not match the date. Anything after the year is ignored.
pub fn separator_date(line: &[u8]) -> Option<DateTime<Utc>> {
    let line = line.strip_prefix(UTF8_BOM).unwrap_or(line);
    let text = String::from_utf8_lossy(line.strip_prefix(b"From ")?);
    let tokens: Vec<&str> = text.split_whitespace().skip(1).collect();

    if tokens.len() < 5 {
        return None;
    }

    // A signed token in the year slot is a zone offset (`%Y` would take it)
    if tokens[4].starts_with(['+', '-']) {
        let zoned = tokens.get(1..6)?.join(" ");
        return DateTime::parse_from_str(&zoned, "%b %e %H:%M:%S %z %Y")
            .ok()
            .map(|dt| dt.with_timezone(&Utc));
    }

    let asctime = tokens[..5].join(" ");
    if let Ok(dt) = NaiveDateTime::parse_from_str(&asctime, "%a %b %e %H:%M:%S %Y") {
        return Some(dt.and_utc());
    }
    let no_weekday = tokens[1..5].join(" ");
    NaiveDateTime::parse_from_str(&no_weekday, "%b %e %H:%M:%S %Y")
        .ok()
        .map(|dt| dt.and_utc())
}

/// Fast newline search (equivalent to memchr for `\n`).
#[inline]
fn memchr_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

/// Check whether a line is an MBOX separator (`From ` at the start).
fn is_mbox_separator(line: &[u8]) -> bool {
    line.strip_prefix(UTF8_BOM)
        .unwrap_or(line)
        .starts_with(b"From ")
}

/// Check whether a line is blank (empty or only whitespace / CR / LF).
fn is_blank_line(line: &[u8]) -> bool {
    line.iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b' ' || b == b'\t')
}
