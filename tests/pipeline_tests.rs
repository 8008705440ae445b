//! End-to-end tests: MBOX source, durable seen-set, and repeated window fetches.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use mailfetch::model::mail::FetchResponse;
use mailfetch::parser::identity::HASH_PREFIX;
use mailfetch::pipeline::fetch_window;
use mailfetch::source::MboxSource;
use mailfetch::store::seen::SeenStore;
use mailfetch::window::TimeWindow;

fn fixture(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn utc(d: u32, h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 12, d, h, m, s).unwrap()
}

fn run(store: &mut SeenStore, since: DateTime<Utc>, until: DateTime<Utc>) -> FetchResponse {
    let mut source = MboxSource::open(fixture("inbox.mbox")).unwrap();
    let window = TimeWindow::new(since, until).unwrap();
    fetch_window(&mut source, store, &window).unwrap()
}

fn ids(resp: &FetchResponse) -> Vec<&str> {
    resp.items.iter().map(|e| e.identity.as_str()).collect()
}

fn open_store(dir: &tempfile::TempDir) -> SeenStore {
    SeenStore::open(dir.path().join("state").join("state.json"), Duration::from_secs(5)).unwrap()
}

#[test]
fn test_overlapping_windows_deliver_each_message_once() {
    let tmp = tempfile::tempdir().unwrap();
    let mut store = open_store(&tmp);

    // Sunday morning only; the day search also returns the afternoon messages
    let first = run(&mut store, utc(28, 0, 0, 0), utc(28, 12, 0, 0));
    assert_eq!(ids(&first), vec!["<sunday-morning@example.com>"]);
    assert_eq!(first.most_recent_received_at, Some(utc(28, 9, 15, 0)));

    // Superset window: the morning message must not come back, nor its redelivery
    let second = run(&mut store, utc(27, 0, 0, 0), utc(29, 23, 59, 59));
    let second_ids = ids(&second);
    assert_eq!(second.count, 3);
    assert_eq!(second_ids[0], "<late-saturday@example.com>");
    assert!(second_ids[1].starts_with(HASH_PREFIX));
    assert_eq!(second_ids[2], "<monday@example.com>");
    assert_eq!(second.most_recent_received_at, Some(utc(29, 7, 0, 0)));

    let third = run(&mut store, utc(27, 0, 0, 0), utc(29, 23, 59, 59));
    assert_eq!(third.count, 0);
    assert!(third.items.is_empty());
}

#[test]
fn test_seen_set_survives_restart() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let mut store = open_store(&tmp);
        let resp = run(&mut store, utc(27, 0, 0, 0), utc(29, 23, 59, 59));
        assert_eq!(resp.count, 4);
        assert!(!store.lock_path().exists());
    }

    let mut reopened = open_store(&tmp);
    assert_eq!(reopened.len(), 4);
    assert!(reopened.is_seen("<monday@example.com>"));
    let resp = run(&mut reopened, utc(27, 0, 0, 0), utc(29, 23, 59, 59));
    assert_eq!(resp.count, 0);

    // Persisted keys are sorted
    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(reopened.path()).unwrap()).unwrap();
    let keys: Vec<&str> = doc["seen"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
    assert_eq!(doc["version"], 1);
}

#[test]
fn test_redelivery_in_same_window_returned_once() {
    let tmp = tempfile::tempdir().unwrap();
    let mut store = open_store(&tmp);

    let resp = run(&mut store, utc(28, 0, 0, 0), utc(28, 23, 59, 59));
    assert_eq!(resp.count, 2);
    assert_eq!(ids(&resp)[0], "<sunday-morning@example.com>");
    assert_eq!(
        resp.items[0].body_text_latest.as_deref(),
        Some("Sounds good.")
    );
    assert_eq!(resp.items[1].body_text_latest.as_deref(), Some("New latest text"));
}

#[test]
fn test_window_bounds_are_inclusive_to_the_second() {
    let tmp = tempfile::tempdir().unwrap();
    let mut store = open_store(&tmp);

    let resp = run(&mut store, utc(28, 9, 15, 0), utc(28, 9, 15, 0));
    assert_eq!(ids(&resp), vec!["<sunday-morning@example.com>"]);

    let resp = run(&mut store, utc(27, 23, 30, 1), utc(28, 9, 14, 59));
    assert_eq!(resp.count, 0);
}

#[test]
fn test_stale_snapshot_until_reload() {
    let tmp = tempfile::tempdir().unwrap();
    let mut a = open_store(&tmp);
    let mut b = open_store(&tmp);

    let first = run(&mut a, utc(29, 0, 0, 0), utc(29, 23, 0, 0));
    assert_eq!(first.count, 1);

    // b opened before a committed, so its snapshot does not know the key yet
    let again = run(&mut b, utc(29, 0, 0, 0), utc(29, 23, 0, 0));
    assert_eq!(again.count, 1);

    a.reload().unwrap();
    b.reload().unwrap();
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 1);
    assert_eq!(run(&mut b, utc(29, 0, 0, 0), utc(29, 23, 0, 0)).count, 0);
}

#[test]
fn test_json_response_shape() {
    let tmp = tempfile::tempdir().unwrap();
    let mut store = open_store(&tmp);
    let resp = run(&mut store, utc(29, 0, 0, 0), utc(29, 23, 0, 0));

    let value = serde_json::to_value(&resp).unwrap();
    assert_eq!(value["count"], 1);
    assert_eq!(value["mostRecentReceivedAt"], "2025-12-29T07:00:00Z");
    let item = &value["items"][0];
    assert_eq!(item["messageId"], "<monday@example.com>");
    assert_eq!(item["subject"], "Monday");
    assert_eq!(item["date"], "2025-12-29T06:59:00Z");
    assert_eq!(item["bodyTextLatest"], "Start of the week.");
    assert_eq!(item["attachmentsMeta"], serde_json::json!([]));
    assert!(item["dealId"].is_null());
}
