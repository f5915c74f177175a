//! Image download with content-addressed naming.
//!
//! An image is stored under `hex(sha256(source_url)) + extension`, so the same source
//! always yields the same filename and repeated references collapse to one entry.

use super::client::FetchClient;
use super::error::ScraperError;
use futures_util::future::join_all;
use reqwest::Url;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

/// Downloaded image and the name it is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedImage {
    pub source: String,
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Filename for an image referenced as `source`.
pub fn content_addressed_name(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    format!("{:x}{}", digest, image_extension(source))
}

/// Extension (with leading dot) of the last path segment of `source`, ignoring any
/// query or fragment. Empty when the segment has none.
pub fn image_extension(source: &str) -> String {
    let path = match Url::parse(source) {
        Ok(url) => url.path().to_string(),
        Err(_) => source
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    let segment = path.rsplit('/').next().unwrap_or_default();
    match segment.rfind('.') {
        Some(i) if i + 1 < segment.len() => segment[i..].to_string(),
        _ => String::new(),
    }
}

/// Downloads images through the shared client with the site's referer.
#[derive(Debug, Clone)]
pub struct ImageMaterializer {
    client: Arc<FetchClient>,
    referer: String,
}

impl ImageMaterializer {
    pub fn new(client: Arc<FetchClient>, referer: impl Into<String>) -> Self {
        Self {
            client,
            referer: referer.into(),
        }
    }

    /// Fetch one image. `source` is the reference as written in the page; relative
    /// references are resolved against `page_url` for the request only.
    pub async fn materialize(
        &self,
        source: &str,
        page_url: &str,
    ) -> Result<MaterializedImage, ScraperError> {
        let absolute = resolve_url(source, page_url);
        let response = self
            .client
            .fetch(&absolute, &[("Referer", self.referer.as_str())])
            .await?;
        let filename = content_addressed_name(source);
        debug!(source, %filename, bytes = response.body.len(), "image stored");
        Ok(MaterializedImage {
            source: source.to_string(),
            filename,
            bytes: response.body,
        })
    }

    /// Fetch every distinct source concurrently. Results keep the order of first
    /// appearance in `sources`.
    pub async fn materialize_all(
        &self,
        sources: &[String],
        page_url: &str,
    ) -> Vec<(String, Result<MaterializedImage, ScraperError>)> {
        let mut distinct: Vec<&String> = Vec::new();
        for source in sources {
            if !distinct.contains(&source) {
                distinct.push(source);
            }
        }
        let results = join_all(distinct.iter().map(|s| self.materialize(s, page_url))).await;
        distinct.into_iter().cloned().zip(results).collect()
    }
}

fn resolve_url(source: &str, page_url: &str) -> String {
    if let Ok(url) = Url::parse(source) {
        return url.to_string();
    }
    Url::parse(page_url)
        .and_then(|base| base.join(source))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| source.to_string())
}
