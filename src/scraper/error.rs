//! Shared error type for the acquisition pipeline.
//!
//! Failures deep in a chapter keep their cause: a volume error wraps a chapter error,
//! which wraps a page error, which wraps the transport or status failure.

use std::time::Duration;
use thiserror::Error;

/// Failure reported by a [Transport](super::Transport) implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Connection-level failure from a transport that does not use reqwest.
    #[error("{0}")]
    Connection(String),
}

#[derive(Debug, Error)]
pub enum ScraperError {
    // HTTP and network
    #[error("Network error: could not reach {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("HTTP {status} when fetching: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Could not build HTTP client: {source}")]
    Client { source: reqwest::Error },

    #[error("Fetch client is shut down")]
    ClientClosed,

    // Parsing
    #[error("Could not parse {what} at {url}: {reason}")]
    Parse {
        what: &'static str,
        url: String,
        reason: String,
    },

    #[error("Invalid selector '{selector}': {reason}")]
    Selector { selector: String, reason: String },

    #[error("Volume {volume_id} is not listed in the catalog of novel {novel_id}")]
    VolumeNotFound { novel_id: u32, volume_id: u32 },

    #[error("Unknown source '{name}'. Supported sources: bilinovel.")]
    UnknownSource { name: String },

    // Rendering and glyphs
    #[error("Rendering did not finish within {}s", .timeout.as_secs())]
    RenderTimeout { timeout: Duration },

    #[error("Rendering context failed: {reason}")]
    Render { reason: String },

    #[error("Glyph map {path}: {reason}")]
    GlyphMap { path: String, reason: String },

    // Pagination
    #[error("Chapter {chapter_id} still links to a next page after {limit} pages")]
    PageLimit { chapter_id: u32, limit: u32 },

    // Context wrappers
    #[error("Failed on page {page} of chapter {chapter_id}")]
    Page {
        chapter_id: u32,
        page: u32,
        #[source]
        source: Box<ScraperError>,
    },

    #[error("Failed to download chapter {chapter_id} of novel {novel_id}")]
    Chapter {
        novel_id: u32,
        chapter_id: u32,
        #[source]
        source: Box<ScraperError>,
    },

    #[error("Failed to download volume {volume_id} of novel {novel_id}")]
    Volume {
        novel_id: u32,
        volume_id: u32,
        #[source]
        source: Box<ScraperError>,
    },
}

impl ScraperError {
    pub(crate) fn parse(what: &'static str, url: &str, reason: impl Into<String>) -> Self {
        ScraperError::Parse {
            what,
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    /// Innermost error of a context chain.
    pub fn root_cause(&self) -> &ScraperError {
        match self {
            ScraperError::Page { source, .. }
            | ScraperError::Chapter { source, .. }
            | ScraperError::Volume { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn context_chain_reaches_status_error() {
        let err = ScraperError::Volume {
            novel_id: 1,
            volume_id: 2,
            source: Box::new(ScraperError::Chapter {
                novel_id: 1,
                chapter_id: 30,
                source: Box::new(ScraperError::Page {
                    chapter_id: 30,
                    page: 2,
                    source: Box::new(ScraperError::HttpStatus {
                        status: 404,
                        url: "https://example.test/novel/1/30_2.html".into(),
                    }),
                }),
            }),
        };
        assert_eq!(err.to_string(), "Failed to download volume 2 of novel 1");
        let chapter = err.source().unwrap();
        assert!(chapter.to_string().contains("chapter 30"));
        assert!(matches!(
            err.root_cause(),
            ScraperError::HttpStatus { status: 404, .. }
        ));
    }

    #[test]
    fn render_timeout_message_shows_seconds() {
        let err = ScraperError::RenderTimeout {
            timeout: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "Rendering did not finish within 30s");
    }
}
