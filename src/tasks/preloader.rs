//! Background fetch/decode around the navigation cursor.
//!
//! Each playlist position moves through
//! `NotRequested -> Fetching -> Decoding -> Ready`, or ends in `Failed` for
//! the rest of the session. A bounded worker pool drains a priority queue of
//! positions near the cursor. Queued requests for positions that have since
//! left the window are dropped when a worker dequeues them, never interrupted
//! mid-flight.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::select;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::cache::disk::DiskCache;
use crate::cache::flight::SingleFlight;
use crate::cache::memory::{EvictionPolicy, MemoryCache};
use crate::cache::CacheKey;
use crate::config::{Configuration, FetchOptions};
use crate::error::FetchError;
use crate::playlist::{ImageItem, Playlist};
use crate::processing::decode::{DecodedImage, prepare};
use crate::processing::layout::{Dimensions, target_size, window_changed};
use crate::sources::ImageSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    NotRequested,
    Fetching,
    Decoding,
    Ready,
    Failed,
}

/// Dispatch urgency; variants compare in the order they are served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Current,
    Next,
    /// Steps ahead of the cursor (2 or more).
    Ahead(usize),
    /// Steps behind the cursor.
    Behind(usize),
}

impl Priority {
    const fn is_background(self) -> bool {
        matches!(self, Self::Ahead(_) | Self::Behind(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum JobKind {
    /// Fetch and decode into the memory cache.
    Decode,
    /// Fetch into the disk cache only.
    Warm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Job {
    priority: Priority,
    seq: u64,
    generation: u64,
    index: usize,
    kind: JobKind,
}

/// Positions the preloader wants warm for `cursor`: the cursor itself,
/// `max_preload` ahead, then up to `behind` positions behind. Positions are
/// never repeated when the playlist is shorter than the window.
pub fn desired_window(
    cursor: usize,
    len: usize,
    max_preload: usize,
    behind: usize,
) -> Vec<(usize, Priority)> {
    if len == 0 {
        return Vec::new();
    }
    let cursor = cursor % len;
    let mut out = Vec::with_capacity(max_preload + behind + 1);
    for step in 0..=max_preload.min(len - 1) {
        let priority = match step {
            0 => Priority::Current,
            1 => Priority::Next,
            n => Priority::Ahead(n),
        };
        out.push(((cursor + step) % len, priority));
    }
    for step in 1..=behind.min(len - 1) {
        let index = (cursor + len - step) % len;
        if out.iter().any(|(i, _)| *i == index) {
            break;
        }
        out.push((index, Priority::Behind(step)));
    }
    out
}

#[derive(Debug, Clone)]
pub struct PreloadOptions {
    pub max_preload: usize,
    pub retain_behind: usize,
    pub small_memory: bool,
    pub workers: usize,
    pub max_resize: f32,
    /// Initial window size.
    pub window: Dimensions,
    pub fetch: FetchOptions,
}

impl From<&Configuration> for PreloadOptions {
    fn from(cfg: &Configuration) -> Self {
        Self {
            max_preload: cfg.max_preload,
            retain_behind: cfg.retain_behind,
            small_memory: cfg.small_memory,
            workers: cfg.workers,
            max_resize: cfg.max_resize,
            window: cfg.default_resolution.dimensions(),
            fetch: cfg.fetch.clone(),
        }
    }
}

/// Snapshot of preloader activity counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PreloadStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    /// Backend fetch attempts, retries included.
    pub source_fetches: u64,
    pub decodes: u64,
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    source_fetches: AtomicU64,
    decodes: AtomicU64,
    failures: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone)]
struct Slot {
    state: SlotState,
    warmed: bool,
    error: Option<FetchError>,
}

struct Schedule {
    slots: Vec<Slot>,
    cursor: usize,
    window: Dimensions,
    paused: bool,
    queue: BinaryHeap<Reverse<Job>>,
    generation: u64,
    seq: u64,
}

/// Raw bytes plus where they came from.
#[derive(Clone)]
struct Fetched {
    bytes: Arc<Vec<u8>>,
    from_disk: bool,
}

type FetchResult = Result<Fetched, FetchError>;
type DecodeResult = Result<Arc<DecodedImage>, FetchError>;

struct Inner {
    playlist: Arc<Playlist>,
    disk: Arc<DiskCache>,
    memory: MemoryCache,
    options: PreloadOptions,
    schedule: Mutex<Schedule>,
    /// Source dimensions learned from earlier decodes, so a memory hit can be
    /// checked without touching the bytes again.
    originals: Mutex<HashMap<CacheKey, Dimensions>>,
    notify: Notify,
    background: Semaphore,
    fetches: SingleFlight<CacheKey, FetchResult>,
    decodes: SingleFlight<(CacheKey, Dimensions), DecodeResult>,
    counters: Counters,
}

/// Cheap to clone; all clones share one schedule and one pair of caches.
#[derive(Clone)]
pub struct Preloader {
    inner: Arc<Inner>,
}

impl Preloader {
    pub fn new(playlist: Arc<Playlist>, disk: Arc<DiskCache>, options: PreloadOptions) -> Self {
        let slots = vec![
            Slot {
                state: SlotState::NotRequested,
                warmed: false,
                error: None,
            };
            playlist.len()
        ];
        let memory = MemoryCache::for_mode(options.max_preload, options.small_memory);
        let background = Semaphore::new((options.workers / 2).max(1));
        Self {
            inner: Arc::new(Inner {
                memory,
                background,
                schedule: Mutex::new(Schedule {
                    slots,
                    cursor: 0,
                    window: options.window,
                    paused: false,
                    queue: BinaryHeap::new(),
                    generation: 0,
                    seq: 0,
                }),
                originals: Mutex::new(HashMap::new()),
                notify: Notify::new(),
                fetches: SingleFlight::new(),
                decodes: SingleFlight::new(),
                counters: Counters::default(),
                playlist,
                disk,
                options,
            }),
        }
    }

    /// Start the worker pool. Workers exit when `cancel` fires; work already
    /// running is abandoned at that point.
    pub fn spawn_workers(&self, cancel: CancellationToken) -> JoinSet<()> {
        let mut set = JoinSet::new();
        for worker in 0..self.inner.options.workers.max(1) {
            let this = self.clone();
            let cancel = cancel.clone();
            set.spawn(async move {
                loop {
                    let job = select! {
                        _ = cancel.cancelled() => break,
                        job = this.next_job() => job,
                    };
                    trace!(worker, index = job.index, priority = ?job.priority, "dequeued");
                    select! {
                        _ = cancel.cancelled() => break,
                        () = this.run_job(job) => {}
                    }
                }
                debug!(worker, "preload worker stopped");
            });
        }
        set
    }

    pub fn playlist(&self) -> &Playlist {
        &self.inner.playlist
    }

    pub fn len(&self) -> usize {
        self.inner.playlist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.playlist.is_empty()
    }

    pub fn memory(&self) -> &MemoryCache {
        &self.inner.memory
    }

    pub fn window(&self) -> Dimensions {
        self.inner.schedule.lock().window
    }

    pub fn cursor(&self) -> usize {
        self.inner.schedule.lock().cursor
    }

    pub fn is_paused(&self) -> bool {
        self.inner.schedule.lock().paused
    }

    pub fn state(&self, index: usize) -> SlotState {
        self.inner
            .schedule
            .lock()
            .slots
            .get(index)
            .map_or(SlotState::Failed, |s| s.state)
    }

    /// Why an item was given up on, if it was.
    pub fn failure(&self, index: usize) -> Option<FetchError> {
        self.inner
            .schedule
            .lock()
            .slots
            .get(index)
            .and_then(|s| s.error.clone())
    }

    pub fn all_failed(&self) -> bool {
        self.inner
            .schedule
            .lock()
            .slots
            .iter()
            .all(|s| s.state == SlotState::Failed)
    }

    pub fn stats(&self) -> PreloadStats {
        let c = &self.inner.counters;
        PreloadStats {
            memory_hits: c.memory_hits.load(Ordering::Relaxed),
            disk_hits: c.disk_hits.load(Ordering::Relaxed),
            source_fetches: c.source_fetches.load(Ordering::Relaxed),
            decodes: c.decodes.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
        }
    }

    /// Indices the preloader currently wants resident or warm.
    pub fn desired(&self) -> Vec<(usize, Priority)> {
        let opts = &self.inner.options;
        desired_window(self.cursor(), self.len(), opts.max_preload, opts.retain_behind)
    }

    /// Move the cursor and re-plan the preload window around it.
    pub fn update_cursor(&self, cursor: usize) {
        self.inner.schedule.lock().cursor = cursor;
        self.replan();
    }

    /// A paused show keeps preloading, but only the current and next images
    /// use the full pool.
    pub fn set_paused(&self, paused: bool) {
        self.inner.schedule.lock().paused = paused;
        self.replan();
    }

    /// Adopt a new window size. Returns `false` when the change is too small
    /// to alter any target size.
    pub fn set_window(&self, window: Dimensions) -> bool {
        {
            let mut sched = self.inner.schedule.lock();
            if !window_changed(sched.window, window) {
                return false;
            }
            debug!(from = %sched.window, to = %window, "window resized");
            sched.window = window;
            for slot in &mut sched.slots {
                if slot.state == SlotState::Ready {
                    slot.state = SlotState::NotRequested;
                }
            }
        }
        self.replan();
        true
    }

    /// Decoded image for `index` at the current window size, waiting only on
    /// that one item.
    pub async fn get(&self, index: usize) -> Result<Arc<DecodedImage>, FetchError> {
        self.load(index).await
    }

    fn eviction_policy(&self, cursor: usize) -> EvictionPolicy {
        let opts = &self.inner.options;
        EvictionPolicy {
            cursor,
            len: self.len(),
            ahead: if opts.small_memory { 1 } else { opts.max_preload },
            behind: if opts.small_memory { 0 } else { opts.retain_behind },
            drop_outside: opts.small_memory,
        }
    }

    fn job_kind(&self, priority: Priority) -> JobKind {
        match priority {
            Priority::Current | Priority::Next => JobKind::Decode,
            Priority::Ahead(_) if !self.inner.options.small_memory => JobKind::Decode,
            Priority::Ahead(_) | Priority::Behind(_) => JobKind::Warm,
        }
    }

    fn replan(&self) {
        let inner = &*self.inner;
        let opts = &inner.options;
        let mut guard = inner.schedule.lock();
        let sched = &mut *guard;
        sched.generation += 1;

        let wanted = desired_window(sched.cursor, sched.slots.len(), opts.max_preload, opts.retain_behind);
        for (index, priority) in wanted {
            let kind = self.job_kind(priority);
            let slot = &sched.slots[index];
            let needed = match kind {
                JobKind::Decode => slot.state == SlotState::NotRequested,
                JobKind::Warm => {
                    slot.state == SlotState::NotRequested
                        && !slot.warmed
                        && !inner.playlist.sources()[inner.playlist.items()[index].source].is_local()
                }
            };
            if needed {
                sched.seq += 1;
                sched.queue.push(Reverse(Job {
                    priority,
                    seq: sched.seq,
                    generation: sched.generation,
                    index,
                    kind,
                }));
            }
        }

        let evicted = inner.memory.evict(self.eviction_policy(sched.cursor));
        release(sched, &evicted);
        drop(guard);
        inner.notify.notify_waiters();
    }

    fn pop_job(&self) -> Option<Job> {
        let mut guard = self.inner.schedule.lock();
        let sched = &mut *guard;
        while let Some(Reverse(job)) = sched.queue.pop() {
            if job.generation != sched.generation {
                trace!(index = job.index, "dropping stale preload request");
                continue;
            }
            let slot = &mut sched.slots[job.index];
            if slot.state != SlotState::NotRequested || (job.kind == JobKind::Warm && slot.warmed) {
                continue;
            }
            slot.state = SlotState::Fetching;
            if !sched.queue.is_empty() {
                self.inner.notify.notify_waiters();
            }
            return Some(job);
        }
        None
    }

    async fn next_job(&self) -> Job {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(job) = self.pop_job() {
                return job;
            }
            notified.await;
        }
    }

    async fn run_job(&self, job: Job) {
        let _permit = if job.priority.is_background() && self.is_paused() {
            self.inner.background.acquire().await.ok()
        } else {
            None
        };
        match job.kind {
            JobKind::Decode => {
                if let Err(err) = self.load(job.index).await {
                    trace!(index = job.index, "preload failed: {err}");
                }
            }
            JobKind::Warm => self.warm(job.index).await,
        }
    }

    async fn warm(&self, index: usize) {
        let Some(item) = self.inner.playlist.get(index) else {
            return;
        };
        match self.fetch_bytes(item).await {
            Ok(_) => {
                let mut sched = self.inner.schedule.lock();
                let slot = &mut sched.slots[index];
                slot.warmed = true;
                if slot.state == SlotState::Fetching {
                    slot.state = SlotState::NotRequested;
                }
            }
            Err(err) => self.mark_failed(index, item, &err),
        }
    }

    fn cached(&self, item: &ImageItem, window: Dimensions) -> Option<Arc<DecodedImage>> {
        let original = *self.inner.originals.lock().get(&item.key)?;
        let target = target_size(original, window, self.inner.options.max_resize);
        self.inner.memory.get(&item.key, target)
    }

    async fn load(&self, index: usize) -> Result<Arc<DecodedImage>, FetchError> {
        let inner = &*self.inner;
        let item = inner
            .playlist
            .get(index)
            .ok_or_else(|| FetchError::ItemNotFound(format!("playlist index {index}")))?;
        if let Some(err) = self.failure(index) {
            return Err(err);
        }
        let window = self.window();
        if let Some(image) = self.cached(item, window) {
            bump(&inner.counters.memory_hits);
            self.finish(index, item, window, &[]);
            return Ok(image);
        }
        self.transition(index, SlotState::NotRequested, SlotState::Fetching);
        let result = inner
            .decodes
            .run((item.key, window), || self.decode(index, item, window))
            .await;
        // the same key can sit at several positions; the leader only settles its own
        match &result {
            Ok(_) => self.finish(index, item, window, &[]),
            Err(err) => self.mark_failed(index, item, err),
        }
        result
    }

    async fn decode(&self, index: usize, item: &ImageItem, window: Dimensions) -> DecodeResult {
        let inner = &*self.inner;
        match self.fetch_and_prepare(index, item, window).await {
            Ok(image) => {
                bump(&inner.counters.decodes);
                inner.originals.lock().insert(item.key, image.original);
                let evicted = inner
                    .memory
                    .put(item.key, image.size, index, Arc::clone(&image));
                self.finish(index, item, window, &evicted);
                trace!(index, size = %image.size, "decoded");
                Ok(image)
            }
            Err(err) => {
                self.mark_failed(index, item, &err);
                Err(err)
            }
        }
    }

    async fn fetch_and_prepare(
        &self,
        index: usize,
        item: &ImageItem,
        window: Dimensions,
    ) -> DecodeResult {
        let fetched = self.fetch_bytes(item).await?;
        self.transition(index, SlotState::Fetching, SlotState::Decoding);
        match self.prepare_blocking(fetched.bytes, window).await {
            Err(FetchError::Decode(msg)) if fetched.from_disk => {
                // a cache file from an earlier run can be damaged; the source may still be fine
                warn!(key = %item.key, "cached bytes failed to decode, refetching: {msg}");
                self.disk_remove(item.key).await;
                let fetched = self.fetch_bytes(item).await?;
                self.prepare_blocking(fetched.bytes, window).await
            }
            other => other,
        }
    }

    async fn prepare_blocking(&self, bytes: Arc<Vec<u8>>, window: Dimensions) -> DecodeResult {
        let max_resize = self.inner.options.max_resize;
        let image = tokio::task::spawn_blocking(move || prepare(&bytes, window, max_resize))
            .await
            .map_err(|e| FetchError::Decode(format!("decode task failed: {e}")))??;
        Ok(Arc::new(image))
    }

    async fn fetch_bytes(&self, item: &ImageItem) -> FetchResult {
        self.inner
            .fetches
            .run(item.key, || self.fetch_uncoalesced(item))
            .await
    }

    /// Disk cache first for remote sources, then the source itself.
    async fn fetch_uncoalesced(&self, item: &ImageItem) -> FetchResult {
        let inner = &*self.inner;
        let source = inner.playlist.source(item);
        let cacheable = !source.is_local();
        if cacheable {
            match self.disk_get(item.key).await {
                Ok(Some(bytes)) => {
                    bump(&inner.counters.disk_hits);
                    return Ok(Fetched {
                        bytes: Arc::new(bytes),
                        from_disk: true,
                    });
                }
                Ok(None) => {}
                Err(err) => warn!(key = %item.key, "disk cache read failed, using source: {err}"),
            }
        }
        let bytes = Arc::new(self.fetch_with_retry(source, &item.id).await?);
        if cacheable {
            self.disk_put(item.key, Arc::clone(&bytes)).await;
        }
        Ok(Fetched {
            bytes,
            from_disk: false,
        })
    }

    async fn fetch_with_retry(&self, source: &ImageSource, id: &str) -> Result<Vec<u8>, FetchError> {
        let policy = &self.inner.options.fetch;
        let mut attempt: u32 = 0;
        loop {
            bump(&self.inner.counters.source_fetches);
            match source.fetch(id).await {
                Ok(bytes) => return Ok(bytes),
                Err(err) if err.is_retryable() && attempt < policy.retries => {
                    let delay = policy.backoff.saturating_mul(1 << attempt.min(16));
                    debug!(id, attempt = attempt + 1, ?delay, "retrying fetch: {err}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn disk_get(&self, key: CacheKey) -> Result<Option<Vec<u8>>, FetchError> {
        let disk = Arc::clone(&self.inner.disk);
        match tokio::task::spawn_blocking(move || disk.get(&key)).await {
            Ok(res) => res,
            Err(e) => Err(FetchError::CacheIo(format!("disk read task failed: {e}"))),
        }
    }

    async fn disk_put(&self, key: CacheKey, bytes: Arc<Vec<u8>>) {
        let disk = Arc::clone(&self.inner.disk);
        let res = tokio::task::spawn_blocking(move || disk.put(&key, &bytes)).await;
        match res {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%key, "disk cache write failed: {err}"),
            Err(err) => warn!(%key, "disk write task failed: {err}"),
        }
    }

    async fn disk_remove(&self, key: CacheKey) {
        let disk = Arc::clone(&self.inner.disk);
        if let Err(err) = tokio::task::spawn_blocking(move || disk.remove(&key)).await {
            warn!(%key, "disk remove task failed: {err}");
        }
    }

    fn transition(&self, index: usize, from: SlotState, to: SlotState) {
        let mut sched = self.inner.schedule.lock();
        if let Some(slot) = sched.slots.get_mut(index) {
            if slot.state == from {
                slot.state = to;
            }
        }
    }

    fn finish(&self, index: usize, item: &ImageItem, window: Dimensions, evicted: &[usize]) {
        let outdated = {
            let mut guard = self.inner.schedule.lock();
            let sched = &mut *guard;
            let outdated = sched.window != window;
            // a replan may have evicted the decode before we got here
            let resident = self.inner.memory.holds_key(&item.key);
            if let Some(slot) = sched.slots.get_mut(index) {
                if slot.state != SlotState::Failed {
                    slot.state = if !outdated && resident {
                        SlotState::Ready
                    } else {
                        SlotState::NotRequested
                    };
                }
            }
            release(sched, evicted);
            outdated
        };
        // the window moved on while this was in flight; queue it at the new size
        if outdated {
            self.replan();
        }
    }

    fn mark_failed(&self, index: usize, item: &ImageItem, err: &FetchError) {
        {
            let mut sched = self.inner.schedule.lock();
            let Some(slot) = sched.slots.get_mut(index) else {
                return;
            };
            if slot.state == SlotState::Failed {
                return;
            }
            slot.state = SlotState::Failed;
            slot.error = Some(err.clone());
        }
        bump(&self.inner.counters.failures);
        warn!(index, id = %item.id, "image unavailable for this session: {err}");
    }
}

/// Positions whose decodes left the memory cache are no longer ready.
fn release(sched: &mut Schedule, evicted: &[usize]) {
    for &index in evicted {
        if let Some(slot) = sched.slots.get_mut(index) {
            if slot.state == SlotState::Ready {
                slot.state = SlotState::NotRequested;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_around_cursor() {
        let window = desired_window(5, 10, 3, 2);
        assert_eq!(
            window,
            vec![
                (5, Priority::Current),
                (6, Priority::Next),
                (7, Priority::Ahead(2)),
                (8, Priority::Ahead(3)),
                (4, Priority::Behind(1)),
                (3, Priority::Behind(2)),
            ]
        );
        let indices: Vec<usize> = window.iter().map(|(i, _)| *i).collect();
        for outside in 0..3 {
            assert!(!indices.contains(&outside));
        }
    }

    #[test]
    fn window_wraps_and_never_repeats() {
        let window = desired_window(9, 10, 3, 2);
        let indices: Vec<usize> = window.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![9, 0, 1, 2, 8, 7]);

        let tiny = desired_window(0, 3, 3, 2);
        let indices: Vec<usize> = tiny.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 1, 2]);

        assert!(desired_window(0, 0, 3, 2).is_empty());
    }

    #[test]
    fn priorities_serve_current_first_and_behind_last() {
        let mut all = vec![
            Priority::Behind(1),
            Priority::Ahead(3),
            Priority::Next,
            Priority::Ahead(2),
            Priority::Current,
        ];
        all.sort();
        assert_eq!(
            all,
            vec![
                Priority::Current,
                Priority::Next,
                Priority::Ahead(2),
                Priority::Ahead(3),
                Priority::Behind(1),
            ]
        );
    }
}
