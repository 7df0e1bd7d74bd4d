use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::processing::layout::Dimensions;
use crate::sources::tags::TagExpr;

/// File name searched for when no explicit `--config` is given.
pub const CONFIG_FILE_NAME: &str = "bird-slideshow.yaml";

/// One configured image origin.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", deny_unknown_fields)]
pub enum SourceSpec {
    Directory {
        path: PathBuf,
        #[serde(default)]
        recursive: bool,
    },
    Website {
        url: String,
    },
    RemoteShell {
        host: String,
        #[serde(default)]
        user: Option<String>,
        #[serde(default)]
        port: Option<u16>,
        #[serde(default, rename = "identity-file")]
        identity_file: Option<PathBuf>,
        path: String,
    },
    TagQuery {
        expression: String,
        #[serde(default)]
        database: Option<PathBuf>,
    },
}

impl SourceSpec {
    fn validate(&self) -> Result<()> {
        match self {
            Self::Directory { path, .. } => {
                ensure!(
                    !path.as_os_str().is_empty(),
                    "directory source requires a path"
                );
            }
            Self::Website { url } => {
                let parsed = url::Url::parse(url)
                    .with_context(|| format!("website source has invalid url {url:?}"))?;
                ensure!(
                    matches!(parsed.scheme(), "http" | "https"),
                    "website source url must be http or https, got {url:?}"
                );
            }
            Self::RemoteShell { host, path, .. } => {
                ensure!(!host.trim().is_empty(), "remote-shell source requires a host");
                ensure!(!path.trim().is_empty(), "remote-shell source requires a path");
            }
            Self::TagQuery { expression, .. } => {
                TagExpr::parse(expression)
                    .with_context(|| format!("invalid tag expression {expression:?}"))?;
            }
        }
        Ok(())
    }
}

/// How the enumerations of several sources are combined into one playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlaylistOrder {
    /// Sources one after another, in configuration order.
    #[default]
    Concatenate,
    /// One item from each source in turn.
    RoundRobin,
    /// Everything shuffled together.
    Shuffle,
}

/// Window resolution written as `"{width}x{height}"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn dimensions(self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 958,
            height: 720,
        }
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (w, h) = raw
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("resolution {raw:?} must look like 1280x720"))?;
        let width = w
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid width in {raw:?}: {e}"))?;
        let height = h
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid height in {raw:?}: {e}"))?;
        Ok(Self { width, height })
    }
}

impl TryFrom<String> for Resolution {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct DiskCacheOptions {
    /// Upper bound on the bytes kept under `cache-dir`.
    pub max_bytes: u64,
    /// Optional age after which entries are dropped regardless of budget.
    #[serde(with = "humantime_serde")]
    pub max_age: Option<Duration>,
}

impl DiskCacheOptions {
    const fn default_max_bytes() -> u64 {
        512 * 1024 * 1024
    }
}

impl Default for DiskCacheOptions {
    fn default() -> Self {
        Self {
            max_bytes: Self::default_max_bytes(),
            max_age: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct FetchOptions {
    /// Connection/command timeout applied by network and remote-shell backends.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Extra attempts after a retryable failure before an item is given up on.
    pub retries: u32,
    /// Delay before the first retry; doubled for each further attempt.
    #[serde(with = "humantime_serde")]
    pub backoff: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retries: 2,
            backoff: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// Image origins, in the order their items join the playlist.
    pub sources: Vec<SourceSpec>,
    /// Time an image stays on screen before the show advances.
    #[serde(with = "humantime_serde")]
    pub wait_time: Duration,
    /// Start in fullscreen mode.
    pub start_full: bool,
    /// Window size used until the display reports a real one.
    pub default_resolution: Resolution,
    /// Largest scale factor applied to an image (2.0 = 200%); below 1.0 every image shrinks.
    pub max_resize: f32,
    /// Directory holding fetched bytes from remote sources.
    pub cache_dir: PathBuf,
    /// Decoded images kept ready ahead of the current one.
    pub max_preload: usize,
    /// Playlist entries behind the cursor kept warm for going back.
    pub retain_behind: usize,
    /// Keep only the current and next image decoded.
    pub small_memory: bool,
    /// Size of the fetch/decode worker pool.
    pub workers: usize,
    /// How multiple sources are combined.
    pub playlist_order: PlaylistOrder,
    /// Deterministic seed for `playlist-order: shuffle`.
    pub shuffle_seed: Option<u64>,
    pub disk_cache: DiskCacheOptions,
    pub fetch: FetchOptions,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(!self.sources.is_empty(), "at least one source is required");
        for (idx, source) in self.sources.iter().enumerate() {
            source
                .validate()
                .with_context(|| format!("invalid source #{}", idx + 1))?;
        }
        ensure!(
            self.max_resize.is_finite() && self.max_resize >= 0.0,
            "max-resize must be a non-negative number"
        );
        ensure!(
            self.wait_time > Duration::ZERO,
            "wait-time must be greater than zero"
        );
        ensure!(
            self.default_resolution.width > 0 && self.default_resolution.height > 0,
            "default-resolution must be non-zero in both dimensions"
        );
        ensure!(self.max_preload > 0, "max-preload must be greater than zero");
        ensure!(self.workers > 0, "workers must be greater than zero");
        ensure!(
            !self.cache_dir.as_os_str().is_empty(),
            "cache-dir must not be empty"
        );
        ensure!(
            self.disk_cache.max_bytes > 0,
            "disk-cache.max-bytes must be greater than zero"
        );
        ensure!(
            self.fetch.timeout > Duration::ZERO,
            "fetch.timeout must be greater than zero"
        );
        Ok(self)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            wait_time: Duration::from_secs(5),
            start_full: false,
            default_resolution: Resolution::default(),
            max_resize: 4.0,
            cache_dir: PathBuf::from("cache"),
            max_preload: 3,
            retain_behind: 2,
            small_memory: false,
            workers: 4,
            playlist_order: PlaylistOrder::default(),
            shuffle_seed: None,
            disk_cache: DiskCacheOptions::default(),
            fetch: FetchOptions::default(),
        }
    }
}

/// Locate a config file: user config dir, then `/etc`, then the working directory.
pub fn find_config_file() -> Option<PathBuf> {
    candidate_config_paths(std::env::var_os("HOME").map(PathBuf::from))
        .into_iter()
        .find(|p| p.is_file())
}

fn candidate_config_paths(home: Option<PathBuf>) -> Vec<PathBuf> {
    let mut out = Vec::with_capacity(3);
    if let Some(home) = home {
        out.push(home.join(".config").join(CONFIG_FILE_NAME));
    }
    out.push(Path::new("/etc").join(CONFIG_FILE_NAME));
    out.push(PathBuf::from(CONFIG_FILE_NAME));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_parses_both_separators() {
        assert_eq!(
            "1280x720".parse::<Resolution>().unwrap(),
            Resolution {
                width: 1280,
                height: 720
            }
        );
        assert_eq!(
            " 800X600 ".parse::<Resolution>().unwrap(),
            Resolution {
                width: 800,
                height: 600
            }
        );
        assert!("800".parse::<Resolution>().is_err());
        assert!("axb".parse::<Resolution>().is_err());
    }

    #[test]
    fn config_search_order_prefers_home() {
        let paths = candidate_config_paths(Some(PathBuf::from("/home/birder")));
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/home/birder/.config/bird-slideshow.yaml"),
                PathBuf::from("/etc/bird-slideshow.yaml"),
                PathBuf::from("bird-slideshow.yaml"),
            ]
        );
        assert_eq!(candidate_config_paths(None).len(), 2);
    }
}
