//! Flattened, immutable playlist built once from every configured source.

use std::fmt;

use futures::future::join_all;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{info, warn};

use crate::cache::CacheKey;
use crate::config::PlaylistOrder;
use crate::sources::ImageSource;

/// One playlist entry. Never mutated after the playlist is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageItem {
    /// Index into [`Playlist::sources`].
    pub source: usize,
    /// Source-relative identifier (path or URL).
    pub id: String,
    pub key: CacheKey,
}

impl fmt::Display for ImageItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

#[derive(Debug)]
pub struct Playlist {
    sources: Vec<ImageSource>,
    items: Vec<ImageItem>,
}

impl Playlist {
    /// Enumerate every source concurrently. A source that fails to enumerate
    /// contributes nothing; the others still play.
    pub async fn build(sources: Vec<ImageSource>, order: PlaylistOrder, seed: Option<u64>) -> Self {
        let listings = join_all(sources.iter().map(|s| s.enumerate())).await;
        let mut groups = Vec::with_capacity(sources.len());
        for (source, listing) in sources.iter().zip(listings) {
            match listing {
                Ok(ids) => {
                    info!(source = %source.identity(), count = ids.len(), "enumerated source");
                    groups.push(ids);
                }
                Err(err) => {
                    warn!(source = %source.identity(), "source unavailable: {err:#}");
                    groups.push(Vec::new());
                }
            }
        }
        Self::from_listings(sources, groups, order, seed)
    }

    /// Build from already enumerated identifiers, one list per source.
    pub fn from_listings(
        sources: Vec<ImageSource>,
        listings: Vec<Vec<String>>,
        order: PlaylistOrder,
        seed: Option<u64>,
    ) -> Self {
        let groups: Vec<Vec<ImageItem>> = sources
            .iter()
            .zip(listings)
            .enumerate()
            .map(|(idx, (source, ids))| {
                let identity = source.identity();
                ids.into_iter()
                    .map(|id| ImageItem {
                        source: idx,
                        key: CacheKey::derive(&identity, &id),
                        id,
                    })
                    .collect()
            })
            .collect();
        let items = arrange(groups, order, seed);
        Self { sources, items }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ImageItem> {
        self.items.get(index)
    }

    pub fn items(&self) -> &[ImageItem] {
        &self.items
    }

    pub fn sources(&self) -> &[ImageSource] {
        &self.sources
    }

    /// The source an item came from.
    pub fn source(&self, item: &ImageItem) -> &ImageSource {
        &self.sources[item.source]
    }
}

/// Combine per-source lists according to `order`.
pub fn arrange<T>(groups: Vec<Vec<T>>, order: PlaylistOrder, seed: Option<u64>) -> Vec<T> {
    match order {
        PlaylistOrder::Concatenate => groups.into_iter().flatten().collect(),
        PlaylistOrder::RoundRobin => {
            let total = groups.iter().map(Vec::len).sum();
            let mut iters: Vec<_> = groups.into_iter().map(Vec::into_iter).collect();
            let mut out = Vec::with_capacity(total);
            while out.len() < total {
                for it in &mut iters {
                    if let Some(item) = it.next() {
                        out.push(item);
                    }
                }
            }
            out
        }
        PlaylistOrder::Shuffle => {
            let mut out: Vec<T> = groups.into_iter().flatten().collect();
            let mut rng = seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
            out.shuffle(&mut rng);
            out
        }
    }
}
