//! Durable seen-set of message identities.
//!
//! ```text
//! {
//!   "version": 1,
//!   "seen": ["<mid1@example.com>", "sha256:abcd…", …]   // sorted
//! }
//! ```
//!
//! Writers serialize through a sibling sentinel file (`state.json` →
//! `state.lock`) created with `O_EXCL`, and replace the document by writing a
//! temporary file in the same directory and renaming it over the old one, so
//! readers only ever see a complete document.
//!
//! Membership checks use the snapshot taken at [`SeenStore::open`] (or the
//! last [`SeenStore::reload`] / [`SeenStore::add_many`]); keys written by
//! other processes after that are not visible until the next reload.

use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::StateConfig;
use crate::error::{FetchError, Result};

/// Current state document version.
pub const STATE_VERSION: u32 = 1;

/// Default delay between lock attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct StateDocument {
    version: u32,
    seen: BTreeSet<String>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            seen: BTreeSet::new(),
        }
    }
}

/// Open handle on the durable seen-set.
#[derive(Debug)]
pub struct SeenStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
    poll_interval: Duration,
    snapshot: BTreeSet<String>,
}

impl SeenStore {
    /// Open (creating if needed) the state document at `path` and load its snapshot.
    pub fn open(path: impl AsRef<Path>, lock_timeout: Duration) -> Result<Self> {
        Self::open_with_poll(path, lock_timeout, DEFAULT_POLL_INTERVAL)
    }

    /// Open using the `[state]` section of the configuration.
    pub fn from_config(config: &StateConfig) -> Result<Self> {
        Self::open_with_poll(
            &config.path,
            config.lock_timeout(),
            config.lock_poll_interval(),
        )
    }

    pub fn open_with_poll(
        path: impl AsRef<Path>,
        lock_timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock_path = path.with_extension("lock");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| FetchError::io(parent, e))?;
        }

        let mut store = Self {
            path,
            lock_path,
            lock_timeout,
            poll_interval,
            snapshot: BTreeSet::new(),
        };

        if !store.path.exists() {
            let _lock = store.lock()?;
            // Another process may have created it while we waited
            if !store.path.exists() {
                write_document(&store.path, &StateDocument::default())?;
                info!(path = %store.path.display(), "Created empty state file");
            }
        }

        store.reload()?;
        Ok(store)
    }

    /// Membership check against the in-memory snapshot.
    pub fn is_seen(&self, key: &str) -> bool {
        self.snapshot.contains(key)
    }

    /// Re-read the durable document into the snapshot.
    pub fn reload(&mut self) -> Result<()> {
        let doc = read_document(&self.path)?;
        debug!(path = %self.path.display(), keys = doc.seen.len(), "Loaded state snapshot");
        self.snapshot = doc.seen;
        Ok(())
    }

    /// Persist a batch of keys.
    ///
    /// Empty keys are ignored. When every key is already in the snapshot the
    /// call returns without touching the disk. Otherwise the document is
    /// re-read under the lock, merged, and atomically replaced; the snapshot
    /// becomes the merged set.
    ///
    /// Returns the number of keys that were not yet in the durable document.
    /// On error nothing is written and the snapshot is unchanged.
    pub fn add_many<I, S>(&mut self, keys: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fresh: Vec<String> = keys
            .into_iter()
            .map(Into::into)
            .filter(|k| !k.is_empty() && !self.snapshot.contains(k))
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }

        let _lock = self.lock()?;

        let mut doc = match read_document(&self.path) {
            Ok(doc) => doc,
            Err(FetchError::FileNotFound(_)) => {
                warn!(path = %self.path.display(), "State file vanished, recreating");
                StateDocument {
                    seen: self.snapshot.clone(),
                    ..StateDocument::default()
                }
            }
            Err(e) => return Err(e),
        };

        let before = doc.seen.len();
        doc.seen.extend(fresh);
        let added = doc.seen.len() - before;

        if added > 0 {
            doc.version = STATE_VERSION;
            write_document(&self.path, &doc)?;
            info!(
                path = %self.path.display(),
                added,
                total = doc.seen.len(),
                "Persisted seen keys"
            );
        } else {
            debug!("All keys already persisted by another writer");
        }

        self.snapshot = doc.seen;
        Ok(added)
    }

    /// Number of keys in the snapshot.
    pub fn len(&self) -> usize {
        self.snapshot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    fn lock(&self) -> Result<LockGuard> {
        LockGuard::acquire(&self.lock_path, self.lock_timeout, self.poll_interval)
    }
}

/// Held advisory lock; the sentinel file is removed on drop.
#[derive(Debug)]
struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    fn acquire(path: &Path, timeout: Duration, poll_interval: Duration) -> Result<Self> {
        let start = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    // Owner pid, for diagnosing stale locks by hand
                    let _ = writeln!(file, "{}", std::process::id());
                    debug!(path = %path.display(), "Acquired state lock");
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let waited = start.elapsed();
                    if waited >= timeout {
                        warn!(path = %path.display(), ?waited, "Timed out waiting for state lock");
                        return Err(FetchError::LockTimeout {
                            path: path.to_path_buf(),
                            waited,
                        });
                    }
                    std::thread::sleep(poll_interval);
                }
                Err(e) => return Err(FetchError::io(path, e)),
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Released state lock"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Could not remove state lock"),
        }
    }
}

fn read_document(path: &Path) -> Result<StateDocument> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            FetchError::FileNotFound(path.to_path_buf())
        } else {
            FetchError::io(path, e)
        }
    })?;

    let doc: StateDocument =
        serde_json::from_str(&contents).map_err(|e| FetchError::InvalidState {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    if doc.version != STATE_VERSION {
        return Err(FetchError::InvalidState {
            path: path.to_path_buf(),
            reason: format!(
                "Incompatible version: expected {STATE_VERSION}, found {}",
                doc.version
            ),
        });
    }
    Ok(doc)
}

/// Write to a temp file beside `path`, fsync, then rename over `path`.
///
/// The replacement keeps the permissions of the file it replaces; a new file
/// gets the usual umask-filtered `0666` rather than the temp file's `0600`.
fn write_document(path: &Path, doc: &StateDocument) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut builder = tempfile::Builder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o666));
    }
    let mut tmp: NamedTempFile = builder
        .tempfile_in(dir)
        .map_err(|e| FetchError::io(dir, e))?;
    if let Ok(existing) = std::fs::metadata(path) {
        tmp.as_file()
            .set_permissions(existing.permissions())
            .map_err(|e| FetchError::io(tmp.path(), e))?;
    }
    serde_json::to_writer_pretty(&mut tmp, doc).map_err(|e| FetchError::io(tmp.path(), e.into()))?;
    tmp.write_all(b"\n")
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| FetchError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| FetchError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn state_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("state").join("state.json")
    }

    #[test]
    fn test_open_creates_empty_document() {
        let tmp = tempfile::tempdir().unwrap();
        let path = state_path(&tmp);
        let store = SeenStore::open(&path, TIMEOUT).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.lock_path(), tmp.path().join("state").join("state.lock"));

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["seen"], serde_json::json!([]));
        assert!(!store.lock_path().exists());
    }

    #[test]
    fn test_add_many_persists_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        let path = state_path(&tmp);
        let mut store = SeenStore::open(&path, TIMEOUT).unwrap();

        let added = store.add_many(["<b@x>", "sha256:00ff", "<a@x>", "<b@x>", ""]).unwrap();
        assert_eq!(added, 3);
        assert!(store.is_seen("<a@x>"));
        assert!(!store.is_seen(""));

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["seen"], serde_json::json!(["<a@x>", "<b@x>", "sha256:00ff"]));
        assert!(!store.lock_path().exists());

        let reopened = SeenStore::open(&path, TIMEOUT).unwrap();
        assert_eq!(reopened.len(), 3);
    }

    #[test]
    fn test_add_many_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let path = state_path(&tmp);
        let mut store = SeenStore::open(&path, TIMEOUT).unwrap();

        assert_eq!(store.add_many(vec!["<a@x>".to_string()]).unwrap(), 1);
        let first = std::fs::read(&path).unwrap();

        // Second call must not even need the lock
        std::fs::write(store.lock_path(), b"held").unwrap();
        assert_eq!(store.add_many(vec!["<a@x>".to_string()]).unwrap(), 0);
        assert_eq!(std::fs::read(&path).unwrap(), first);
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = SeenStore::open(state_path(&tmp), TIMEOUT).unwrap();
        assert_eq!(store.add_many(Vec::<String>::new()).unwrap(), 0);
        assert_eq!(store.add_many([""]).unwrap(), 0);
    }

    #[test]
    fn test_lock_timeout_leaves_state_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let path = state_path(&tmp);
        let mut store =
            SeenStore::open_with_poll(&path, Duration::from_millis(150), Duration::from_millis(10))
                .unwrap();
        let before = std::fs::read(&path).unwrap();

        std::fs::write(store.lock_path(), b"someone else").unwrap();
        let err = store.add_many(["<a@x>"]).unwrap_err();
        assert!(err.is_store());
        match err {
            FetchError::LockTimeout { waited, .. } => {
                assert!(waited >= Duration::from_millis(150))
            }
            other => panic!("expected LockTimeout, got {other:?}"),
        }
        assert!(!store.is_seen("<a@x>"));
        assert_eq!(std::fs::read(&path).unwrap(), before);
        // Foreign lock is not ours to remove
        assert!(store.lock_path().exists());
    }

    #[test]
    fn test_corrupt_document_fails_write_cleanly() {
        let tmp = tempfile::tempdir().unwrap();
        let path = state_path(&tmp);
        let mut store = SeenStore::open(&path, TIMEOUT).unwrap();
        store.add_many(["<old@x>"]).unwrap();

        // Corrupted behind our back
        std::fs::write(&path, "not json").unwrap();
        let err = store.add_many(["<new@x>"]).unwrap_err();
        assert!(err.is_store());
        assert!(matches!(err, FetchError::InvalidState { .. }));
        assert!(!store.is_seen("<new@x>"));
        assert!(store.is_seen("<old@x>"));
        assert!(!store.lock_path().exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"not json");
    }

    #[test]
    fn test_io_failure_on_write_leaves_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let path = state_path(&tmp);
        let mut store = SeenStore::open(&path, TIMEOUT).unwrap();

        // A directory where the document should be
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        let err = store.add_many(["<new@x>"]).unwrap_err();
        assert!(err.is_store());
        assert!(matches!(err, FetchError::Io { .. }));
        assert!(!store.is_seen("<new@x>"));
        assert!(store.is_empty());
        assert!(!store.lock_path().exists());
        assert!(path.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_rewrite_keeps_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let path = state_path(&tmp);
        let mut store = SeenStore::open(&path, TIMEOUT).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o640)).unwrap();

        store.add_many(["<a@x>"]).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[test]
    fn test_merges_concurrent_writer() {
        let tmp = tempfile::tempdir().unwrap();
        let path = state_path(&tmp);
        let mut a = SeenStore::open(&path, TIMEOUT).unwrap();
        let mut b = SeenStore::open(&path, TIMEOUT).unwrap();

        a.add_many(["<one@x>"]).unwrap();
        // b's snapshot is stale until it writes or reloads
        assert!(!b.is_seen("<one@x>"));

        b.add_many(["<two@x>"]).unwrap();
        assert!(b.is_seen("<one@x>"));
        assert!(b.is_seen("<two@x>"));

        a.reload().unwrap();
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_parallel_writers_lose_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let path = state_path(&tmp);
        SeenStore::open(&path, TIMEOUT).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let mut store = SeenStore::open_with_poll(
                        &path,
                        Duration::from_secs(30),
                        Duration::from_millis(5),
                    )
                    .unwrap();
                    for i in 0..5 {
                        store.add_many([format!("<{t}-{i}@x>")]).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let store = SeenStore::open(&path, TIMEOUT).unwrap();
        assert_eq!(store.len(), 20);
        assert!(!store.lock_path().exists());
    }

    #[test]
    fn test_rejects_garbage_and_unknown_version() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state.json");

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            SeenStore::open(&path, TIMEOUT),
            Err(FetchError::InvalidState { .. })
        ));

        std::fs::write(&path, r#"{"version": 2, "seen": []}"#).unwrap();
        let err = SeenStore::open(&path, TIMEOUT).unwrap_err();
        assert!(err.is_store());
        assert!(err.to_string().contains("expected 1, found 2"));
    }

    #[test]
    fn test_accepts_document_without_seen_list() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, r#"{"version": 1}"#).unwrap();
        let store = SeenStore::open(&path, TIMEOUT).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_recreates_deleted_file_on_write() {
        let tmp = tempfile::tempdir().unwrap();
        let path = state_path(&tmp);
        let mut store = SeenStore::open(&path, TIMEOUT).unwrap();
        std::fs::remove_file(&path).unwrap();

        store.add_many(["<a@x>"]).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(store.add_many(["<b@x>"]).unwrap(), 1);
        let reopened = SeenStore::open(&path, TIMEOUT).unwrap();
        assert!(reopened.is_seen("<a@x>"));
        assert!(reopened.is_seen("<b@x>"));
    }
}
