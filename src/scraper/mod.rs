//! Acquisition pipeline: fetch client, page rendering and cleanup, pagination, and
//! the source adapters built on them.

mod client;
mod content;
mod error;
mod extract;
mod glyph;
mod images;
mod paginator;
mod resolver;
mod session;

#[cfg(feature = "chrome")]
mod chrome;

pub mod bilinovel;

pub use client::{
    parse_retry_after, FetchClient, FetchClientBuilder, FetchResponse, RawResponse,
    ReqwestTransport, Transport,
};
pub use error::{ScraperError, TransportError};
pub use extract::{extract, extract_links, Field, FieldSpec, Fields, Link};
pub use glyph::{remap_text, GlyphMapper, TableGlyphMapper, UnmappedGlyph, PLACEHOLDER_GLYPH};
pub use images::{content_addressed_name, image_extension, ImageMaterializer, MaterializedImage};
pub use paginator::{page_url, PageProfile, Paginator, PaginatorOptions, DEFAULT_MAX_PAGES};
pub use resolver::{PassthroughResolver, ReorderResolver, ResolveRequest, DEFAULT_RENDER_TIMEOUT};
pub use session::{ChapterProgress, Session, SessionConfig};

#[cfg(feature = "chrome")]
pub use chrome::ChromeResolver;

/// Shared DOM helpers for packaging code that rewrites chapter fragments.
pub(crate) mod dom {
    pub(crate) use super::content::{image_source, images, inner_xhtml, parse_fragment, set_attr};
}

use crate::model::{Chapter, ExtraFile, Novel, Volume};
use async_trait::async_trait;
use std::str::FromStr;

/// A site the downloader can read novels from.
#[async_trait]
pub trait NovelSource: Send + Sync {
    /// Novel metadata and its volumes in catalog order. With `skip_chapters`, no
    /// chapter page or cover is fetched.
    async fn get_novel(&self, novel_id: u32, skip_chapters: bool) -> Result<Novel, ScraperError>;

    async fn get_volume(
        &self,
        novel_id: u32,
        volume_id: u32,
        skip_chapters: bool,
    ) -> Result<Volume, ScraperError>;

    async fn get_chapter(
        &self,
        novel_id: u32,
        volume_id: u32,
        chapter_id: u32,
    ) -> Result<Chapter, ScraperError>;

    /// Style sheet placed in every package built from this source.
    fn style_css(&self) -> &str;

    /// Additional files (fonts, auxiliary styles) placed in every package.
    fn extra_files(&self) -> Vec<ExtraFile>;

    /// Release session resources. Later calls are no-ops.
    async fn close(&self) -> Result<(), ScraperError>;
}

/// Supported source. Used for dispatch and for the `--source` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceKind {
    #[default]
    Bilinovel,
}

impl FromStr for SourceKind {
    type Err = ScraperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bilinovel" => Ok(SourceKind::Bilinovel),
            other => Err(ScraperError::UnknownSource {
                name: other.to_string(),
            }),
        }
    }
}

/// Build the adapter for `kind`; it takes ownership of `session`.
pub fn open_source(kind: SourceKind, session: Session) -> Box<dyn NovelSource> {
    match kind {
        SourceKind::Bilinovel => Box::new(bilinovel::BilinovelSource::new(session)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_kind_parses_case_insensitively() {
        assert_eq!(" BiliNovel ".parse::<SourceKind>().unwrap(), SourceKind::Bilinovel);
        let err = "royalroad".parse::<SourceKind>().unwrap_err();
        assert!(matches!(err, ScraperError::UnknownSource { .. }));
    }
}
