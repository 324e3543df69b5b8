//! Durable permit bucket state.
//!
//! A restarted process must not exceed a quota the exchange is still
//! tracking, so buckets marked persistable load and save their state here.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::error::Result;

/// Persisted form of one permit bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermitState {
    /// Permits left in the current window.
    pub available: u32,
    /// Window start in epoch milliseconds.
    pub window_start_ms: i64,
}

/// Storage for permit bucket state keyed by limiter name.
pub trait LimiterStore: Send + Sync {
    /// Load the last saved state for `key`.
    fn load(&self, key: &str) -> Option<PermitState>;

    /// Save the state for `key`.
    fn save(&self, key: &str, state: PermitState) -> Result<()>;
}

/// In-process store; state survives limiter re-creation but not restarts.
#[derive(Debug, Default)]
pub struct MemoryLimiterStore {
    states: Mutex<HashMap<String, PermitState>>,
}

impl MemoryLimiterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LimiterStore for MemoryLimiterStore {
    fn load(&self, key: &str) -> Option<PermitState> {
        self.states.lock().get(key).copied()
    }

    fn save(&self, key: &str, state: PermitState) -> Result<()> {
        self.states.lock().insert(key.to_string(), state);
        Ok(())
    }
}

/// JSON file holding every persistable bucket of the process.
///
/// `save` updates the in-memory map at once. Inside a tokio runtime the file
/// write runs on the blocking pool; elsewhere it runs inline. Every write
/// serializes the whole current map, so a late write never loses a newer
/// state.
#[derive(Debug, Clone)]
pub struct FileLimiterStore {
    inner: Arc<FileInner>,
}

#[derive(Debug)]
struct FileInner {
    path: PathBuf,
    states: Mutex<HashMap<String, PermitState>>,
    /// Held from serialization through rename.
    write_lock: Mutex<()>,
    staging_seq: AtomicU64,
}

impl FileLimiterStore {
    /// Open the store at `path`, reading existing state if the file exists.
    ///
    /// An unreadable or corrupt file is logged and treated as empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let states = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Discarding corrupt limiter state");
                HashMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), buckets = states.len(), "Opened limiter store");
        Ok(Self {
            inner: Arc::new(FileInner {
                path,
                states: Mutex::new(states),
                write_lock: Mutex::new(()),
                staging_seq: AtomicU64::new(0),
            }),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Write the current state to disk now.
    pub fn flush(&self) -> Result<()> {
        self.inner.flush()
    }
}

impl FileInner {
    fn flush(&self) -> Result<()> {
        let _writing = self.write_lock.lock();
        let content = serde_json::to_string_pretty(&*self.states.lock())?;

        let staging = self.staging_path();
        if let Err(e) = fs::write(&staging, content) {
            let _ = fs::remove_file(&staging);
            return Err(e.into());
        }
        fs::rename(&staging, &self.path)?;
        Ok(())
    }

    /// Sibling file unique to this process and write.
    fn staging_path(&self) -> PathBuf {
        let seq = self.staging_seq.fetch_add(1, Ordering::Relaxed);
        let name = self
            .path
            .file_name()
            .map_or_else(|| "limits".into(), |name| name.to_string_lossy());
        self.path
            .with_file_name(format!("{name}.{}.{seq}.tmp", process::id()))
    }
}

impl LimiterStore for FileLimiterStore {
    fn load(&self, key: &str) -> Option<PermitState> {
        self.inner.states.lock().get(key).copied()
    }

    fn save(&self, key: &str, state: PermitState) -> Result<()> {
        self.inner.states.lock().insert(key.to_string(), state);

        if Handle::try_current().is_err() {
            return self.inner.flush();
        }
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = inner.flush() {
                warn!(path = %inner.path.display(), error = %e, "Failed to write limiter state");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryLimiterStore::new();
        assert!(store.load("a").is_none());

        let state = PermitState {
            available: 3,
            window_start_ms: 1_000,
        };
        store.save("a", state).unwrap();
        assert_eq!(store.load("a"), Some(state));
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("limits.json");

        let state = PermitState {
            available: 7,
            window_start_ms: 1_700_000_000_000,
        };
        FileLimiterStore::open(&path)
            .unwrap()
            .save("bitflyer", state)
            .unwrap();

        let reopened = FileLimiterStore::open(&path).unwrap();
        assert_eq!(reopened.load("bitflyer"), Some(state));
        assert!(reopened.load("bybit").is_none());
    }

    #[test]
    fn corrupt_file_is_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("limits.json");
        fs::write(&path, "not json").unwrap();

        let store = FileLimiterStore::open(&path).unwrap();
        assert!(store.load("anything").is_none());
    }

    #[test]
    fn concurrent_saves_keep_every_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("limits.json");
        let store = FileLimiterStore::open(&path).unwrap();

        std::thread::scope(|scope| {
            for worker in 0..8u32 {
                let store = &store;
                scope.spawn(move || {
                    for round in 0..25u32 {
                        let state = PermitState {
                            available: round,
                            window_start_ms: i64::from(worker),
                        };
                        store.save(&format!("bucket-{worker}"), state).unwrap();
                    }
                });
            }
        });

        let reopened = FileLimiterStore::open(&path).unwrap();
        for worker in 0..8u32 {
            let state = reopened.load(&format!("bucket-{worker}")).unwrap();
            assert_eq!(state.available, 24);
            assert_eq!(state.window_start_ms, i64::from(worker));
        }
        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn saves_inside_runtime_reach_disk_after_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("limits.json");
        let store = FileLimiterStore::open(&path).unwrap();

        for available in 0..10 {
            let state = PermitState {
                available,
                window_start_ms: 1_700_000_000_000,
            };
            store.save("bitflyer", state).unwrap();
        }
        assert_eq!(store.load("bitflyer").unwrap().available, 9);
        store.flush().unwrap();

        let reopened = FileLimiterStore::open(&path).unwrap();
        assert_eq!(reopened.load("bitflyer").unwrap().available, 9);
    }
}
