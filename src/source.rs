//! Upstream message sources: where candidate raw messages come from.
//!
//! A source answers two questions: which messages arrived within a range of
//! whole days, and what are their raw bytes and precise arrival times. The
//! day-granularity search is deliberately coarse; the batch operation applies
//! the second-level window afterwards.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::error::{FetchError, Result};
use crate::parser::header::{parse_date, Headers};
use crate::parser::mbox::{separator_date, MboxParser};

/// Source-assigned message identifier.
pub type MessageUid = u64;

/// A message as retrieved from the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    pub uid: MessageUid,
    /// Complete message bytes: headers, body and attachments.
    pub raw: Vec<u8>,
    /// When the source received the message.
    pub received_at: DateTime<Utc>,
}

/// An upstream mailbox.
///
/// Failures are reported as [`FetchError::Upstream`].
pub trait MessageSource {
    /// Identifiers of messages that arrived on a day in `since_day..before_day`,
    /// in ascending order.
    fn search(&mut self, since_day: NaiveDate, before_day: NaiveDate) -> Result<Vec<MessageUid>>;

    /// Retrieve messages by identifier. Identifiers the source cannot return
    /// are omitted from the result.
    fn fetch(&mut self, uids: &[MessageUid]) -> Result<Vec<FetchedMessage>>;
}

/// Where one message lives in the MBOX file.
#[derive(Debug, Clone)]
struct MboxLocation {
    uid: MessageUid,
    offset: u64,
    length: u64,
    received_at: DateTime<Utc>,
}

/// File-backed source over a local MBOX.
///
/// The file is scanned once at [`MboxSource::open`]; messages are read back
/// by offset on [`MessageSource::fetch`]. A message's uid is its 1-based
/// position in the file. Its arrival time is the date on its `From ` line,
/// else its own `Date:` header; messages with neither are never candidates.
#[derive(Debug)]
pub struct MboxSource {
    path: PathBuf,
    locations: Vec<MboxLocation>,
}

impl MboxSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let parser = MboxParser::new(&path).map_err(upstream)?;

        let mut locations = Vec::new();
        let mut uid: MessageUid = 0;
        parser
            .parse(&mut |entry| {
                uid += 1;
                let received_at = separator_date(entry.separator).or_else(|| {
                    Headers::parse(entry.message)
                        .raw("date")
                        .and_then(parse_date)
                });
                match received_at {
                    Some(received_at) => locations.push(MboxLocation {
                        uid,
                        offset: entry.offset,
                        length: entry.message.len() as u64,
                        received_at,
                    }),
                    None => warn!(uid, offset = entry.offset, "No arrival date, skipping message"),
                }
                true
            })
            .map_err(upstream)?;

        info!(
            path = %path.display(),
            messages = uid,
            dated = locations.len(),
            "Scanned MBOX"
        );
        Ok(Self { path, locations })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of messages with a usable arrival date.
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

impl MessageSource for MboxSource {
    fn search(&mut self, since_day: NaiveDate, before_day: NaiveDate) -> Result<Vec<MessageUid>> {
        let uids: Vec<MessageUid> = self
            .locations
            .iter()
            .filter(|loc| {
                let day = loc.received_at.date_naive();
                since_day <= day && day < before_day
            })
            .map(|loc| loc.uid)
            .collect();
        debug!(%since_day, %before_day, found = uids.len(), "MBOX search");
        Ok(uids)
    }

    fn fetch(&mut self, uids: &[MessageUid]) -> Result<Vec<FetchedMessage>> {
        let mut messages = Vec::with_capacity(uids.len());
        for &uid in uids {
            let Ok(idx) = self.locations.binary_search_by_key(&uid, |loc| loc.uid) else {
                debug!(uid, "Unknown uid, omitted");
                continue;
            };
            let loc = &self.locations[idx];
            let raw = MboxParser::read_message_at(&self.path, loc.offset, loc.length)
                .map_err(upstream)?;
            messages.push(FetchedMessage {
                uid,
                raw,
                received_at: loc.received_at,
            });
        }
        Ok(messages)
    }
}

fn upstream(err: FetchError) -> FetchError {
    match err {
        FetchError::Upstream(_) => err,
        other => FetchError::Upstream(other.to_string()),
    }
}
