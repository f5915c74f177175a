//! Rendering step that restores the reading order of a page.
//!
//! Chapter pages ship their paragraphs shuffled and rely on a script to put them
//! back. A [ReorderResolver] takes the raw page, lets that script run, and returns the
//! resulting markup once the content container is present.

use super::error::ScraperError;
use async_trait::async_trait;
use std::time::Duration;

/// Default bound on a single render.
pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(30);

/// What a render waits for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequest {
    /// Selector that must be present before the markup is read, e.g. `#acontent`.
    pub wait_selector: String,
    /// Substring of the resource URL whose completed load signals the reorder ran.
    pub signal_resource: String,
    pub timeout: Duration,
}

impl ResolveRequest {
    pub fn new(wait_selector: impl Into<String>, signal_resource: impl Into<String>) -> Self {
        Self {
            wait_selector: wait_selector.into(),
            signal_resource: signal_resource.into(),
            timeout: DEFAULT_RENDER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
pub trait ReorderResolver: Send + Sync {
    /// Render `raw_html` and return the markup after reordering.
    async fn resolve(&self, raw_html: &str, request: &ResolveRequest) -> Result<String, ScraperError>;

    /// Release the rendering context. Later calls are no-ops.
    async fn close(&self) -> Result<(), ScraperError> {
        Ok(())
    }
}

/// Resolver that returns pages unchanged, for sources that ship content in reading
/// order and for builds without a browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughResolver;

#[async_trait]
impl ReorderResolver for PassthroughResolver {
    async fn resolve(&self, raw_html: &str, _request: &ResolveRequest) -> Result<String, ScraperError> {
        Ok(raw_html.to_string())
    }
}
