use thiserror::Error;

/// Per-item failure raised while acquiring or decoding one playlist entry.
///
/// Cloneable so a single in-flight fetch can hand the same outcome to every
/// waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Network or remote-shell connection failure, including timeouts.
    #[error("source unreachable: {0}")]
    SourceUnreachable(String),

    /// The source listed the item but can no longer produce it.
    #[error("item not found: {0}")]
    ItemNotFound(String),

    /// The source answered with content that is not an image.
    #[error("not an image: {0}")]
    NotAnImage(String),

    /// Corrupt or unsupported image bytes.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Disk cache read/write failure. Callers treat this as a cache miss.
    #[error("cache i/o failed: {0}")]
    CacheIo(String),
}

impl FetchError {
    /// Only connection-level failures are worth another attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::SourceUnreachable(_))
    }
}

/// Terminal conditions reported by the navigation controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlideshowError {
    /// No source produced a single playlist entry.
    #[error("no images found in configured sources")]
    EmptyPlaylist,

    /// Every playlist entry failed; there is nothing left to show.
    #[error("no displayable images: every playlist entry failed")]
    NoDisplayableImages,
}
