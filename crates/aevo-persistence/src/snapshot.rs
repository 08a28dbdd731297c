//! Ticker ring buffers and order history backed by JSON files.
//!
//! Updates land in memory and are mirrored to disk in batches: once
//! `max_pending` updates have accumulated, every changed file
//! (`<asset>_tickers.json`, `orders.json`) is rewritten whole. Writes go to a
//! temporary sibling first and are renamed into place, so a reader never sees
//! a half-written file. Call [`SnapshotStore::flush`] to write the remainder;
//! dropping the store flushes too.

use crate::error::{PersistenceError, PersistenceResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Ticker payloads kept per asset.
pub const TICKER_HISTORY: usize = 100;

/// Updates buffered before the files are rewritten.
pub const DEFAULT_MAX_PENDING: usize = 20;

const ORDERS_FILE: &str = "orders.json";

#[derive(Default)]
struct Inner {
    tickers: HashMap<String, VecDeque<Value>>,
    latest: HashMap<String, Value>,
    orders: Vec<Value>,
    dirty_tickers: HashSet<String>,
    orders_dirty: bool,
    pending: usize,
}

/// In-memory snapshot state plus its on-disk mirror.
pub struct SnapshotStore {
    dir: PathBuf,
    inner: Mutex<Inner>,
    /// Serializes flushes so an older batch never overwrites a newer one.
    flush_lock: Mutex<()>,
    max_pending: usize,
    files_written: AtomicU64,
}

impl SnapshotStore {
    /// Create a store rooted at `dir`. The directory is created lazily.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_max_pending(dir, DEFAULT_MAX_PENDING)
    }

    /// Create a store that flushes after `max_pending` updates.
    pub fn with_max_pending(dir: impl Into<PathBuf>, max_pending: usize) -> Self {
        Self {
            dir: dir.into(),
            inner: Mutex::new(Inner::default()),
            flush_lock: Mutex::new(()),
            max_pending: max_pending.max(1),
            files_written: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store a ticker payload for `asset`.
    ///
    /// The in-memory state is updated even when the triggered flush fails.
    pub fn record_ticker(&self, asset: &str, data: Value) -> PersistenceResult<()> {
        self.ticker_path(asset)?;
        let full = {
            let mut inner = self.inner.lock();
            inner.latest.insert(asset.to_string(), data.clone());
            let ring = inner.tickers.entry(asset.to_string()).or_default();
            if ring.len() == TICKER_HISTORY {
                ring.pop_front();
            }
            ring.push_back(data);
            inner.dirty_tickers.insert(asset.to_string());
            inner.pending += 1;
            inner.pending >= self.max_pending
        };
        if full {
            self.flush()?;
        }
        Ok(())
    }

    /// Append order updates.
    pub fn record_orders(&self, orders: &[Value]) -> PersistenceResult<()> {
        if orders.is_empty() {
            return Ok(());
        }
        let full = {
            let mut inner = self.inner.lock();
            inner.orders.extend_from_slice(orders);
            inner.orders_dirty = true;
            inner.pending += 1;
            inner.pending >= self.max_pending
        };
        if full {
            self.flush()?;
        }
        Ok(())
    }

    /// Rewrite every file changed since the last flush.
    ///
    /// Files that fail to write stay dirty and are retried on the next flush.
    pub fn flush(&self) -> PersistenceResult<()> {
        let _guard = self.flush_lock.lock();

        let (tickers, orders) = {
            let mut inner = self.inner.lock();
            if inner.dirty_tickers.is_empty() && !inner.orders_dirty {
                inner.pending = 0;
                return Ok(());
            }
            let mut tickers = Vec::with_capacity(inner.dirty_tickers.len());
            for asset in &inner.dirty_tickers {
                if let Some(ring) = inner.tickers.get(asset) {
                    tickers.push((asset.clone(), serde_json::to_vec(ring)?));
                }
            }
            let orders = if inner.orders_dirty {
                Some(serde_json::to_vec(&inner.orders)?)
            } else {
                None
            };
            inner.dirty_tickers.clear();
            inner.orders_dirty = false;
            inner.pending = 0;
            (tickers, orders)
        };

        let mut first_error = None;
        for (asset, contents) in tickers {
            let result = self
                .ticker_path(&asset)
                .and_then(|path| self.write_file(&path, &contents));
            match result {
                Ok(()) => debug!(%asset, "Ticker snapshot written"),
                Err(e) => {
                    self.inner.lock().dirty_tickers.insert(asset);
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(contents) = orders {
            match self.write_file(&self.dir.join(ORDERS_FILE), &contents) {
                Ok(()) => debug!("Order snapshot written"),
                Err(e) => {
                    self.inner.lock().orders_dirty = true;
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Number of snapshot files written so far.
    pub fn files_written(&self) -> u64 {
        self.files_written.load(Ordering::Relaxed)
    }

    /// Most recent ticker payload for `asset`.
    pub fn latest_ticker(&self, asset: &str) -> Option<Value> {
        self.inner.lock().latest.get(asset).cloned()
    }

    /// Buffered tickers for `asset`, oldest first.
    pub fn tickers(&self, asset: &str) -> Vec<Value> {
        self.inner
            .lock()
            .tickers
            .get(asset)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn orders(&self) -> Vec<Value> {
        self.inner.lock().orders.clone()
    }

    fn ticker_path(&self, asset: &str) -> PersistenceResult<PathBuf> {
        let valid = !asset.is_empty()
            && asset
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(PersistenceError::InvalidAsset(asset.to_string()));
        }
        Ok(self.dir.join(format!("{asset}_tickers.json")))
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> PersistenceResult<()> {
        fs::create_dir_all(&self.dir)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents)?;
        if let Err(e) = fs::rename(&tmp, path) {
            warn!(?e, path = %path.display(), "Snapshot rename failed");
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        self.files_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for SnapshotStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(?e, "Failed to flush snapshots on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn read_json(path: &Path) -> Value {
        serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
    }

    #[test]
    fn test_ticker_ring_keeps_last_hundred() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path().join("data"));

        for i in 0..(TICKER_HISTORY + 5) {
            store.record_ticker("ETH-PERP", json!({ "seq": i })).unwrap();
        }
        store.flush().unwrap();

        let buffered = store.tickers("ETH-PERP");
        assert_eq!(buffered.len(), TICKER_HISTORY);
        assert_eq!(buffered[0]["seq"], 5);
        assert_eq!(store.latest_ticker("ETH-PERP").unwrap()["seq"], 104);

        let on_disk = read_json(&temp_dir.path().join("data/ETH-PERP_tickers.json"));
        assert_eq!(on_disk.as_array().unwrap().len(), TICKER_HISTORY);
        assert_eq!(on_disk[99]["seq"], 104);
    }

    #[test]
    fn test_assets_are_kept_apart() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path());

        store.record_ticker("ETH-PERP", json!({ "p": 1 })).unwrap();
        store.record_ticker("BTC-PERP", json!({ "p": 2 })).unwrap();
        assert!(!temp_dir.path().join("BTC-PERP_tickers.json").exists());
        store.flush().unwrap();

        assert_eq!(store.tickers("ETH-PERP").len(), 1);
        assert_eq!(store.tickers("BTC-PERP").len(), 1);
        assert!(store.tickers("SOL-PERP").is_empty());
        assert!(temp_dir.path().join("BTC-PERP_tickers.json").exists());
        assert!(temp_dir.path().join("ETH-PERP_tickers.json").exists());
        assert_eq!(store.files_written(), 2);
    }

    #[test]
    fn test_orders_accumulate() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path());

        store
            .record_orders(&[json!({ "order_id": "0x1" }), json!({ "order_id": "0x2" })])
            .unwrap();
        store.record_orders(&[json!({ "order_id": "0x3" })]).unwrap();
        store.flush().unwrap();

        let on_disk = read_json(&temp_dir.path().join("orders.json"));
        assert_eq!(on_disk.as_array().unwrap().len(), 3);
        assert_eq!(store.orders()[2]["order_id"], "0x3");
    }

    #[test]
    fn test_empty_orders_noop() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path());

        store.record_orders(&[]).unwrap();
        store.flush().unwrap();
        assert!(!temp_dir.path().join("orders.json").exists());
        assert_eq!(store.files_written(), 0);
    }

    #[test]
    fn test_rejects_path_like_asset() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp_dir.path());

        let err = store.record_ticker("../ETH", json!({})).unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidAsset(_)));
    }

    #[test]
    fn test_write_failure_keeps_memory_state() {
        let temp_dir = TempDir::new().unwrap();
        // A regular file where the directory should be.
        let blocker = temp_dir.path().join("blocked");
        fs::write(&blocker, b"x").unwrap();
        let store = SnapshotStore::with_max_pending(&blocker, 1);

        assert!(store.record_ticker("ETH-PERP", json!({ "p": 1 })).is_err());
        assert_eq!(store.tickers("ETH-PERP").len(), 1);
        // Still dirty, so the next flush retries.
        assert!(store.flush().is_err());
        assert_eq!(store.files_written(), 0);
    }

    #[test]
    fn test_tickers_are_written_in_batches() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::with_max_pending(temp_dir.path(), 10);
        let path = temp_dir.path().join("ETH-PERP_tickers.json");

        for i in 0..25 {
            store.record_ticker("ETH-PERP", json!({ "seq": i })).unwrap();
        }
        assert_eq!(store.files_written(), 2);
        assert_eq!(read_json(&path).as_array().unwrap().len(), 20);

        store.flush().unwrap();
        assert_eq!(store.files_written(), 3);
        assert_eq!(read_json(&path).as_array().unwrap().len(), 25);

        store.flush().unwrap();
        assert_eq!(store.files_written(), 3);
    }

    #[test]
    fn test_drop_flushes_pending_updates() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = SnapshotStore::new(temp_dir.path());
            store.record_orders(&[json!({ "order_id": "0x1" })]).unwrap();
            assert!(!temp_dir.path().join("orders.json").exists());
        }
        let on_disk = read_json(&temp_dir.path().join("orders.json"));
        assert_eq!(on_disk[0]["order_id"], "0x1");
    }
}
