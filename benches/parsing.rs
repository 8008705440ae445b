use criterion::{criterion_group, criterion_main, Criterion};
use std::path::Path;

use chrono::Utc;

fn fixture(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn bench_decode(c: &mut Criterion) {
    let raw = std::fs::read(fixture("alternative.eml")).unwrap();
    let received_at = Utc::now();

    c.bench_function("decode_alternative_eml", |b| {
        b.iter(|| mailfetch::parser::mime::decode(&raw, received_at).unwrap())
    });
}

fn bench_extract_latest(c: &mut Criterion) {
    let mut body = String::from("Latest reply with a few words\n\n");
    for i in 0..200 {
        body.push_str(&format!("> quoted history line {i}\n"));
    }
    body.push_str("On Wed, Oct 22, 2025 at 8:19 PM Someone <x@y> wrote:\n> older\n");

    c.bench_function("extract_latest_long_thread", |b| {
        b.iter(|| mailfetch::reply::extract_latest(&body))
    });
}

fn bench_scan_mbox(c: &mut Criterion) {
    let path = fixture("inbox.mbox");

    c.bench_function("scan_inbox_mbox", |b| {
        b.iter(|| mailfetch::source::MboxSource::open(&path).unwrap().len())
    });
}

criterion_group!(benches, bench_decode, bench_extract_latest, bench_scan_mbox);
criterion_main!(benches);
