//! Size-bounded, one-file-per-key store of raw fetched bytes.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::CacheKey;
use crate::error::FetchError;

/// Metadata for one cached file.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub size: u64,
    pub last_access: SystemTime,
    /// SHA-256 of the bytes, known for entries written by this process.
    pub digest: Option<[u8; 32]>,
    // monotonic recency; wall-clock timestamps tie too easily
    tick: u64,
}

#[derive(Debug, Default)]
struct DiskIndex {
    entries: HashMap<CacheKey, CacheEntry>,
    total_bytes: u64,
    clock: u64,
}

impl DiskIndex {
    fn next_tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn insert(&mut self, entry: CacheEntry) {
        self.total_bytes += entry.size;
        if let Some(old) = self.entries.insert(entry.key, entry) {
            self.total_bytes = self.total_bytes.saturating_sub(old.size);
        }
    }

    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let old = self.entries.remove(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(old.size);
        Some(old)
    }

    fn least_recent(&self) -> Option<CacheKey> {
        self.entries
            .values()
            .min_by_key(|e| (e.tick, e.key))
            .map(|e| e.key)
    }
}

/// Persistent store under `cache-dir`.
///
/// Every operation is atomic with respect to the others; callers never lock.
/// Writes for the same key are idempotent (last writer wins).
#[derive(Debug)]
pub struct DiskCache {
    root: PathBuf,
    max_bytes: u64,
    max_age: Option<Duration>,
    index: Mutex<DiskIndex>,
}

impl DiskCache {
    /// Open (creating if needed) the cache directory and index what it already holds.
    pub fn open(root: impl Into<PathBuf>, max_bytes: u64, max_age: Option<Duration>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create cache dir {}", root.display()))?;

        let mut found = Vec::new();
        for entry in fs::read_dir(&root)
            .with_context(|| format!("failed to read cache dir {}", root.display()))?
        {
            let Ok(entry) = entry else { continue };
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(".tmp") {
                // interrupted write from an earlier run
                let _ = fs::remove_file(entry.path());
                continue;
            }
            let Some(key) = CacheKey::from_hex(name) else { continue };
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            let last_access = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((key, meta.len(), last_access));
        }
        found.sort_by_key(|(key, _, at)| (*at, *key));

        let cache = Self {
            root,
            max_bytes,
            max_age,
            index: Mutex::new(DiskIndex::default()),
        };
        {
            let mut index = cache.index.lock();
            for (key, size, last_access) in found {
                let tick = index.next_tick();
                index.insert(CacheEntry {
                    key,
                    size,
                    last_access,
                    digest: None,
                    tick,
                });
            }
        }
        let expired = cache.purge_expired();
        let evicted = cache.evict_if_over_budget();
        info!(
            root = %cache.root.display(),
            entries = cache.len(),
            bytes = cache.total_bytes(),
            expired,
            evicted,
            "disk cache opened"
        );
        Ok(cache)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.to_hex())
    }

    /// Bytes for `key`, or `None` on a miss.
    pub fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, FetchError> {
        let digest = {
            let mut index = self.index.lock();
            let Some(entry) = index.entries.get(key) else {
                return Ok(None);
            };
            if self.is_expired(entry.last_access) {
                index.remove(key);
                let _ = fs::remove_file(self.path_for(key));
                debug!(%key, "disk cache entry expired");
                return Ok(None);
            }
            entry.digest
        };

        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.index.lock().remove(key);
                if err.kind() == std::io::ErrorKind::NotFound {
                    return Ok(None);
                }
                return Err(FetchError::CacheIo(format!("read {}: {err}", path.display())));
            }
        };
        if let Some(expected) = digest {
            let actual: [u8; 32] = Sha256::digest(&bytes).into();
            if actual != expected {
                self.index.lock().remove(key);
                let _ = fs::remove_file(&path);
                return Err(FetchError::CacheIo(format!(
                    "integrity check failed for {}",
                    path.display()
                )));
            }
        }

        let now = SystemTime::now();
        {
            let mut index = self.index.lock();
            let tick = index.next_tick();
            if let Some(entry) = index.entries.get_mut(key) {
                entry.last_access = now;
                entry.tick = tick;
            }
        }
        // persist recency for the next session's index
        if let Ok(file) = fs::File::options().write(true).open(&path) {
            let _ = file.set_modified(now);
        }
        Ok(Some(bytes))
    }

    /// Store `bytes` under `key`, then evict down to budget.
    pub fn put(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), FetchError> {
        let path = self.path_for(key);
        let io_err = |e: std::io::Error| FetchError::CacheIo(format!("write {}: {e}", path.display()));

        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp")
            .tempfile_in(&self.root)
            .map_err(io_err)?;
        tmp.write_all(bytes).map_err(io_err)?;
        tmp.persist(&path).map_err(|e| io_err(e.error))?;

        {
            let mut index = self.index.lock();
            let tick = index.next_tick();
            index.insert(CacheEntry {
                key: *key,
                size: bytes.len() as u64,
                last_access: SystemTime::now(),
                digest: Some(Sha256::digest(bytes).into()),
                tick,
            });
        }
        debug!(%key, bytes = bytes.len(), "disk cache put");
        self.evict_if_over_budget();
        Ok(())
    }

    /// Forget `key` and delete its file. Returns whether it was present.
    pub fn remove(&self, key: &CacheKey) -> bool {
        let removed = self.index.lock().remove(key).is_some();
        let path = self.path_for(key);
        if let Err(err) = fs::remove_file(&path)
            && err.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %path.display(), "failed to delete cache file: {err}");
        }
        removed
    }

    /// Remove least-recently-used entries until the total fits the budget.
    /// The last remaining entry is never evicted. Returns how many were removed.
    pub fn evict_if_over_budget(&self) -> usize {
        let mut index = self.index.lock();
        let mut removed = 0;
        while index.total_bytes > self.max_bytes && index.entries.len() > 1 {
            let Some(victim) = index.least_recent() else { break };
            if let Some(entry) = index.remove(&victim) {
                let path = self.path_for(&victim);
                if let Err(err) = fs::remove_file(&path)
                    && err.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(path = %path.display(), "failed to delete evicted cache file: {err}");
                }
                debug!(key = %victim, bytes = entry.size, "disk cache evicted");
                removed += 1;
            }
        }
        removed
    }

    fn purge_expired(&self) -> usize {
        let Some(max_age) = self.max_age else { return 0 };
        let now = SystemTime::now();
        let mut index = self.index.lock();
        let stale: Vec<CacheKey> = index
            .entries
            .values()
            .filter(|e| now.duration_since(e.last_access).unwrap_or_default() > max_age)
            .map(|e| e.key)
            .collect();
        for key in &stale {
            index.remove(key);
            let _ = fs::remove_file(self.path_for(key));
        }
        stale.len()
    }

    fn is_expired(&self, last_access: SystemTime) -> bool {
        self.max_age.is_some_and(|max_age| {
            SystemTime::now()
                .duration_since(last_access)
                .unwrap_or_default()
                > max_age
        })
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.index.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.index.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> u64 {
        self.index.lock().total_bytes
    }

    pub const fn max_bytes(&self) -> u64 {
        self.max_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u32) -> CacheKey {
        CacheKey::derive("test", &n.to_string())
    }

    #[test]
    fn put_then_get_hits() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path(), 1024, None).unwrap();
        assert_eq!(cache.get(&key(1)).unwrap(), None);
        cache.put(&key(1), b"jay").unwrap();
        assert_eq!(cache.get(&key(1)).unwrap().as_deref(), Some(&b"jay"[..]));
        assert!(dir.path().join(key(1).to_hex()).is_file());
    }

    #[test]
    fn evicts_least_recently_used_first() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path(), 25, None).unwrap();
        cache.put(&key(1), &[1; 10]).unwrap();
        cache.put(&key(2), &[2; 10]).unwrap();
        // touch 1 so 2 becomes the oldest
        cache.get(&key(1)).unwrap();
        cache.put(&key(3), &[3; 10]).unwrap();

        assert!(cache.contains(&key(1)));
        assert!(!cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
        assert!(!dir.path().join(key(2).to_hex()).exists());
        assert_eq!(cache.total_bytes(), 20);
    }

    #[test]
    fn never_evicts_the_sole_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path(), 4, None).unwrap();
        cache.put(&key(1), &[0; 16]).unwrap();
        assert!(cache.contains(&key(1)));
        cache.put(&key(2), &[0; 16]).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&key(2)));
    }

    #[test]
    fn budget_holds_after_any_sequence_of_puts() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path(), 100, None).unwrap();
        for n in 0..40u32 {
            let size = (n * 7 % 45 + 1) as usize;
            cache.put(&key(n % 13), &vec![n as u8; size]).unwrap();
            assert!(cache.total_bytes() <= 100 || cache.len() == 1);
        }
    }

    #[test]
    fn reopen_reuses_existing_entries() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = DiskCache::open(dir.path(), 1024, None).unwrap();
            cache.put(&key(5), b"robin").unwrap();
        }
        fs::write(dir.path().join("notes.txt"), b"ignore me").unwrap();
        fs::write(dir.path().join(".tmpabc"), b"partial").unwrap();

        let cache = DiskCache::open(dir.path(), 1024, None).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key(5)).unwrap().as_deref(), Some(&b"robin"[..]));
        assert!(dir.path().join("notes.txt").exists());
        assert!(!dir.path().join(".tmpabc").exists());
    }

    #[test]
    fn corrupted_entry_reports_cache_io_and_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path(), 1024, None).unwrap();
        cache.put(&key(9), b"original").unwrap();
        fs::write(dir.path().join(key(9).to_hex()), b"tampered").unwrap();
        assert!(matches!(cache.get(&key(9)), Err(FetchError::CacheIo(_))));
        assert!(!cache.contains(&key(9)));
    }

    #[test]
    fn expired_entries_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path(), 1024, Some(Duration::from_millis(20))).unwrap();
        cache.put(&key(1), b"old").unwrap();
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get(&key(1)).unwrap(), None);
        assert!(cache.is_empty());
    }
}
