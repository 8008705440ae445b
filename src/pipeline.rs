//! The batch operation: search, decode, deduplicate, window, commit.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::mail::FetchResponse;
use crate::parser::mime::decode;
use crate::source::MessageSource;
use crate::store::seen::SeenStore;
use crate::window::TimeWindow;

/// Return every message that arrived within `window` and has not been
/// returned before, then record them as seen.
///
/// Undecodable messages are skipped. Source failures and store failures
/// (lock timeout, I/O, bad state file) abort the batch; in that case nothing
/// new is recorded, so the same messages come back on retry.
pub fn fetch_window<S>(
    source: &mut S,
    store: &mut SeenStore,
    window: &TimeWindow,
) -> Result<FetchResponse>
where
    S: MessageSource + ?Sized,
{
    let (since_day, before_day) = window.day_bounds();
    let uids = source.search(since_day, before_day)?;
    info!(
        since = %window.since(),
        until = %window.until(),
        candidates = uids.len(),
        "Fetching window"
    );
    if uids.is_empty() {
        return Ok(FetchResponse::default());
    }

    let fetched = source.fetch(&uids)?;
    let mut accepted: HashSet<String> = HashSet::new();
    let mut items = Vec::new();

    for message in fetched {
        let email = match decode(&message.raw, message.received_at) {
            Ok(email) => email,
            Err(e) => {
                warn!(uid = message.uid, error = %e, "Skipping undecodable message");
                continue;
            }
        };

        if store.is_seen(&email.identity) || accepted.contains(&email.identity) {
            debug!(uid = message.uid, identity = %email.identity, "Already delivered");
            continue;
        }
        if !window.contains(email.received_at) {
            debug!(
                uid = message.uid,
                received_at = %email.received_at,
                "Outside window"
            );
            continue;
        }

        accepted.insert(email.identity.clone());
        items.push(email);
    }

    store.add_many(items.iter().map(|e| e.identity.clone()))?;

    let response = FetchResponse::from_items(items);
    info!(
        count = response.count,
        most_recent = ?response.most_recent_received_at,
        "Window fetched"
    );
    Ok(response)
}
