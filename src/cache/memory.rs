//! Bounded holder of decoded images, evicted by distance from the playlist cursor.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::CacheKey;
use crate::processing::decode::DecodedImage;
use crate::processing::layout::Dimensions;

/// Where the cursor is and which neighbours deserve to stay decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    pub cursor: usize,
    pub len: usize,
    /// Entries up to this many steps ahead of the cursor are kept first.
    pub ahead: usize,
    /// Entries up to this many steps behind are kept next.
    pub behind: usize,
    /// Drop everything outside `ahead` immediately instead of waiting for pressure.
    pub drop_outside: bool,
}

impl EvictionPolicy {
    /// 0 = current/ahead, 1 = retained behind, 2 = evictable.
    fn class(&self, index: usize) -> u8 {
        if self.len == 0 {
            return 2;
        }
        let fwd = (index + self.len - self.cursor % self.len) % self.len;
        if fwd <= self.ahead {
            return 0;
        }
        let back = (self.cursor % self.len + self.len - index) % self.len;
        if back <= self.behind { 1 } else { 2 }
    }

    fn distance(&self, index: usize) -> usize {
        if self.len == 0 {
            return usize::MAX;
        }
        let fwd = (index + self.len - self.cursor % self.len) % self.len;
        fwd.min(self.len - fwd)
    }

    pub fn is_evictable(&self, index: usize) -> bool {
        self.class(index) == 2
    }
}

struct Slot {
    index: usize,
    image: Arc<DecodedImage>,
    seq: u64,
}

struct Inner {
    entries: HashMap<(CacheKey, Dimensions), Slot>,
    policy: Option<EvictionPolicy>,
    seq: u64,
}

/// Decoded images keyed by (cache key, target size), since a resize makes
/// earlier decodes useless.
pub struct MemoryCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                policy: None,
                seq: 0,
            }),
        }
    }

    /// `max_preload` ahead plus the current image, or just current and next in small-memory mode.
    pub fn for_mode(max_preload: usize, small_memory: bool) -> Self {
        if small_memory {
            Self::new(2)
        } else {
            Self::new(max_preload + 1)
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, key: &CacheKey, target: Dimensions) -> Option<Arc<DecodedImage>> {
        self.inner
            .lock()
            .entries
            .get(&(*key, target))
            .map(|slot| Arc::clone(&slot.image))
    }

    /// Insert a decode for playlist `index`. Returns playlist indices that no
    /// longer have any decode resident.
    pub fn put(
        &self,
        key: CacheKey,
        target: Dimensions,
        index: usize,
        image: Arc<DecodedImage>,
    ) -> Vec<usize> {
        let mut inner = self.inner.lock();
        inner.seq += 1;
        let seq = inner.seq;
        inner
            .entries
            .insert((key, target), Slot { index, image, seq });
        self.enforce(&mut inner)
    }

    /// Adopt a new cursor position and drop what the policy says must go.
    pub fn evict(&self, policy: EvictionPolicy) -> Vec<usize> {
        let mut inner = self.inner.lock();
        inner.policy = Some(policy);
        self.enforce(&mut inner)
    }

    fn enforce(&self, inner: &mut Inner) -> Vec<usize> {
        let mut evicted = Vec::new();
        let policy = inner.policy;

        if let Some(policy) = policy.filter(|p| p.drop_outside) {
            let doomed: Vec<_> = inner
                .entries
                .iter()
                .filter(|(_, slot)| policy.class(slot.index) != 0)
                .map(|(k, _)| *k)
                .collect();
            for k in doomed {
                if let Some(slot) = inner.entries.remove(&k) {
                    evicted.push(slot.index);
                }
            }
        }

        while inner.entries.len() > self.capacity {
            // an index decoded again at another size makes its older decodes dead weight
            let mut latest: HashMap<usize, u64> = HashMap::new();
            for slot in inner.entries.values() {
                let seq = latest.entry(slot.index).or_default();
                *seq = (*seq).max(slot.seq);
            }
            let victim = inner
                .entries
                .iter()
                .max_by_key(|(_, slot)| {
                    let superseded = latest.get(&slot.index).is_some_and(|s| *s > slot.seq);
                    match policy {
                        Some(p) => (
                            superseded,
                            p.class(slot.index),
                            p.distance(slot.index),
                            Reverse(slot.seq),
                        ),
                        None => (superseded, 0, 0, Reverse(slot.seq)),
                    }
                })
                .map(|(k, _)| *k);
            let Some(victim) = victim else { break };
            if let Some(slot) = inner.entries.remove(&victim) {
                trace!(index = slot.index, size = %victim.1, "memory cache evicted");
                evicted.push(slot.index);
            }
        }

        evicted.sort_unstable();
        evicted.dedup();
        evicted.retain(|i| !inner.entries.values().any(|slot| slot.index == *i));
        evicted
    }

    /// Resident playlist indices the current policy considers evictable.
    pub fn evictable_indices(&self) -> Vec<usize> {
        let inner = self.inner.lock();
        let Some(policy) = inner.policy else {
            return Vec::new();
        };
        let mut out: Vec<usize> = inner
            .entries
            .values()
            .map(|slot| slot.index)
            .filter(|i| policy.is_evictable(*i))
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Whether any decode of `key` is resident, whatever its size.
    pub fn holds_key(&self, key: &CacheKey) -> bool {
        self.inner.lock().entries.keys().any(|(k, _)| k == key)
    }

    pub fn resident_indices(&self) -> Vec<usize> {
        let mut out: Vec<usize> = self.inner.lock().entries.values().map(|s| s.index).collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
