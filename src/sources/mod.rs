//! Image origins: each can list its items once and fetch any item's raw bytes.

pub mod directory;
pub mod remote;
pub mod tags;
pub mod website;

use std::ffi::OsStr;
use std::fmt;
use std::path::Path;

use anyhow::Result;

use crate::config::{FetchOptions, SourceSpec};
use crate::error::FetchError;

pub use directory::DirectorySource;
pub use remote::RemoteShellSource;
pub use tags::TagQuerySource;
pub use website::WebsiteSource;

/// Extensions the decoder understands (lowercase, without dot).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Directory,
    Website,
    RemoteShell,
    TagQuery,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Directory => "directory",
            Self::Website => "website",
            Self::RemoteShell => "remote-shell",
            Self::TagQuery => "tag-query",
        })
    }
}

/// A configured origin. Immutable once built.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Directory(DirectorySource),
    Website(WebsiteSource),
    RemoteShell(RemoteShellSource),
    TagQuery(TagQuerySource),
}

impl ImageSource {
    pub fn from_spec(spec: &SourceSpec, fetch: &FetchOptions) -> Result<Self> {
        Ok(match spec {
            SourceSpec::Directory { path, recursive } => {
                Self::Directory(DirectorySource::new(path, *recursive))
            }
            SourceSpec::Website { url } => Self::Website(WebsiteSource::new(url, fetch.timeout)?),
            SourceSpec::RemoteShell {
                host,
                user,
                port,
                identity_file,
                path,
            } => Self::RemoteShell(RemoteShellSource {
                host: host.clone(),
                user: user.clone(),
                port: *port,
                identity_file: identity_file.clone(),
                path: path.clone(),
                timeout: fetch.timeout,
            }),
            SourceSpec::TagQuery {
                expression,
                database,
            } => Self::TagQuery(TagQuerySource::new(expression, database.clone())?),
        })
    }

    pub const fn kind(&self) -> SourceKind {
        match self {
            Self::Directory(_) => SourceKind::Directory,
            Self::Website(_) => SourceKind::Website,
            Self::RemoteShell(_) => SourceKind::RemoteShell,
            Self::TagQuery(_) => SourceKind::TagQuery,
        }
    }

    /// Stable identity string feeding cache key derivation.
    pub fn identity(&self) -> String {
        match self {
            Self::Directory(s) => format!("directory:{}", s.root().display()),
            Self::Website(s) => format!("website:{}", s.page()),
            Self::RemoteShell(s) => format!("remote-shell:{}:{}:{}", s.destination(), s.port.unwrap_or(22), s.path),
            Self::TagQuery(s) => format!("tag-query:{}?{}", s.database().display(), s.expression()),
        }
    }

    /// Local sources already live on disk; their bytes skip the disk cache.
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Directory(_) | Self::TagQuery(_))
    }

    /// List item identifiers. Unreachable single entries are skipped; only a
    /// failure of the source as a whole is an error.
    pub async fn enumerate(&self) -> Result<Vec<String>> {
        match self {
            Self::Directory(s) => {
                let s = s.clone();
                tokio::task::spawn_blocking(move || s.enumerate()).await?
            }
            Self::Website(s) => s.enumerate().await,
            Self::RemoteShell(s) => Ok(s.enumerate().await?),
            Self::TagQuery(s) => {
                let s = s.clone();
                tokio::task::spawn_blocking(move || s.enumerate()).await?
            }
        }
    }

    pub async fn fetch(&self, identifier: &str) -> Result<Vec<u8>, FetchError> {
        match self {
            Self::Directory(_) | Self::TagQuery(_) => read_local(Path::new(identifier)).await,
            Self::Website(s) => s.fetch(identifier).await,
            Self::RemoteShell(s) => s.fetch(identifier).await,
        }
    }
}

/// Return `true` if `path` has a decodable image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
}

async fn read_local(path: &Path) -> Result<Vec<u8>, FetchError> {
    tokio::fs::read(path).await.map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => FetchError::ItemNotFound(path.display().to_string()),
        _ => FetchError::SourceUnreachable(format!("{}: {err}", path.display())),
    })
}
