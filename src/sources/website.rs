//! Website backend: a listing page whose image links form the enumeration.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::StatusCode;
use tracing::{debug, warn};
use url::Url;

use super::is_supported_image;
use crate::error::FetchError;

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<(img|a)\b[^>]*?\b(src|href)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#)
        .expect("valid regex")
});

#[derive(Debug, Clone)]
pub struct WebsiteSource {
    page: Url,
    client: reqwest::Client,
}

impl WebsiteSource {
    pub fn new(page: &str, timeout: Duration) -> Result<Self> {
        let page = Url::parse(page).with_context(|| format!("invalid website url {page:?}"))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build http client")?;
        Ok(Self { page, client })
    }

    pub fn page(&self) -> &Url {
        &self.page
    }

    pub async fn enumerate(&self) -> Result<Vec<String>> {
        let html = self
            .client
            .get(self.page.clone())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .with_context(|| format!("failed to load listing page {}", self.page))?
            .text()
            .await
            .with_context(|| format!("failed to read listing page {}", self.page))?;

        let links = extract_image_links(&html, &self.page);
        if links.is_empty() {
            warn!(page = %self.page, "listing page has no image links");
        } else {
            debug!(page = %self.page, count = links.len(), "listing page scanned");
        }
        Ok(links.into_iter().map(String::from).collect())
    }

    pub async fn fetch(&self, identifier: &str) -> Result<Vec<u8>, FetchError> {
        let url = Url::parse(identifier)
            .map_err(|e| FetchError::ItemNotFound(format!("{identifier}: {e}")))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::SourceUnreachable(format!("{identifier}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, identifier));
        }
        if let Some(ct) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if !is_image_content_type(ct) {
                return Err(FetchError::NotAnImage(format!("{identifier}: content-type {ct}")));
            }
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::SourceUnreachable(format!("{identifier}: {e}")))?;
        Ok(bytes.to_vec())
    }
}

fn classify_status(status: StatusCode, identifier: &str) -> FetchError {
    let msg = format!("{identifier}: http {status}");
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        FetchError::SourceUnreachable(msg)
    } else {
        FetchError::ItemNotFound(msg)
    }
}

fn is_image_content_type(raw: &str) -> bool {
    let mime = raw.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    mime.starts_with("image/") || mime == "application/octet-stream"
}

/// Image links on a page: every `<img src>` plus `<a href>` targets ending in
/// an image extension, resolved against `base`, first occurrence kept.
pub fn extract_image_links(html: &str, base: &Url) -> Vec<Url> {
    let mut out: Vec<Url> = Vec::new();
    for caps in LINK_RE.captures_iter(html) {
        let tag = caps[1].to_ascii_lowercase();
        let attr = caps[2].to_ascii_lowercase();
        if (tag == "img") != (attr == "src") {
            continue;
        }
        let Some(raw) = caps.get(3).or_else(|| caps.get(4)).or_else(|| caps.get(5)) else {
            continue;
        };
        let raw = raw.as_str().trim();
        if raw.is_empty() || raw.starts_with("data:") || raw.starts_with('#') {
            continue;
        }
        let Ok(url) = base.join(raw) else {
            debug!(link = raw, "skipping unresolvable link");
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") {
            continue;
        }
        if tag == "a" && !is_supported_image(Path::new(url.path())) {
            continue;
        }
        if !out.contains(&url) {
            out.push(url);
        }
    }
    out
}
