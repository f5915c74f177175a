//! bilinovel adapter: catalog discovery, volume metadata, and concurrent chapter
//! retrieval.
//!
//! URL shapes:
//! - novel page: `/novel/{n}.html`
//! - catalog: `/novel/{n}/catalog`
//! - volume page: `/novel/{n}/vol_{v}.html`
//! - chapter: `/novel/{n}/{c}.html`, page p at `/novel/{n}/{c}_{p}.html`

use super::error::ScraperError;
use super::extract::{capture_id, extract, extract_links, FieldSpec};
use super::paginator::{PageProfile, Paginator};
use super::session::Session;
use super::NovelSource;
use crate::model::{Chapter, ExtraFile, Novel, Volume};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use regex::Regex;
use scraper::Html;
use tracing::{debug, info, warn};

pub const BASE_URL: &str = "https://www.bilinovel.com";

static PROFILE: PageProfile = PageProfile {
    referer: BASE_URL,
    headers: &[
        (
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7",
        ),
        (
            "Accept-Language",
            "zh-CN,zh;q=0.9,en-GB;q=0.8,en;q=0.7,zh-TW;q=0.6",
        ),
        ("Cookie", "night=1;"),
    ],
    next_marker: r#"<a onclick="window.location.href = ReadParams.url_next;">下一頁</a>"#,
    font_marker: r#"font-family: "read""#,
    title_selector: "#atitle",
    content_selector: "#acontent",
    decorations: &[".cgo", "center", ".google-auto-placed"],
    signal_resource: "chapterlog.js",
};

const STYLE_CSS: &str = r#"body > div {
  margin: 0 0.5em;
}

h1 {
  font-size: 1.4em;
  text-align: center;
  margin: 1em 0;
}

p {
  text-indent: 2em;
  line-height: 1.6;
  margin: 0.4em 0;
}

hr {
  margin: 1em 0;
  border: none;
  border-top: 1px solid #999;
}

img {
  display: block;
  max-width: 100%;
  height: auto;
  margin: 0.5em auto;
}
"#;

const CHAPTER_LINK: &str = r"/novel/(\d+)/(\d+)\.html";

const NOVEL_FIELDS: [FieldSpec; 4] = [
    FieldSpec::text("title", ".book-title").required(),
    FieldSpec::text("description", ".book-summary>content"),
    FieldSpec::all_text("authors", ".authorname>a"),
    FieldSpec::all_text("illustrators", ".illname>a"),
];

fn pattern(re: &str) -> Result<Regex, ScraperError> {
    Regex::new(re).map_err(|e| ScraperError::Selector {
        selector: re.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
struct BookInfo {
    title: String,
    description: String,
    authors: Vec<String>,
}

fn parse_book_info(doc: &Html, url: &str) -> Result<BookInfo, ScraperError> {
    let fields = extract(doc, url, &NOVEL_FIELDS)?;
    let mut authors = fields.list("authors").to_vec();
    authors.extend_from_slice(fields.list("illustrators"));
    Ok(BookInfo {
        title: fields.text("title").to_string(),
        description: fields.text("description").to_string(),
        authors,
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Catalog {
    novel_title: String,
    /// Volume ids in document order; the series index is position + 1.
    volume_ids: Vec<u32>,
}

impl Catalog {
    fn series_index(&self, volume_id: u32) -> Option<u32> {
        self.volume_ids
            .iter()
            .position(|&id| id == volume_id)
            .map(|i| i as u32 + 1)
    }
}

fn parse_catalog(html: &str, url: &str, novel_id: u32) -> Result<Catalog, ScraperError> {
    let doc = Html::parse_document(html);
    let fields = extract(&doc, url, &[FieldSpec::text("title", ".book-title")])?;
    let volume_link = pattern(&format!(r"/novel/{}/vol_(\d+)\.html", novel_id))?;
    let volume_ids = extract_links(&doc, "a.volume-cover-img")?
        .iter()
        .filter_map(|link| capture_id(&volume_link, &link.href, 1))
        .collect();
    Ok(Catalog {
        novel_title: fields.text("title").to_string(),
        volume_ids,
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
struct VolumePage {
    info: BookInfo,
    cover_url: String,
    /// (chapter id, catalog title, absolute URL) in reading order.
    chapters: Vec<(u32, String, String)>,
}

fn parse_volume_page(html: &str, url: &str, base_url: &str) -> Result<VolumePage, ScraperError> {
    let doc = Html::parse_document(html);
    let info = parse_book_info(&doc, url)?;
    let cover = extract(&doc, url, &[FieldSpec::attr("cover", ".book-cover", "src")])?;
    let chapter_link = pattern(CHAPTER_LINK)?;
    let mut chapters = Vec::new();
    for link in extract_links(&doc, ".chapter-li.jsChapter a")? {
        let id = capture_id(&chapter_link, &link.href, 2).ok_or_else(|| {
            ScraperError::parse(
                "volume page",
                url,
                format!("chapter link '{}' has no chapter id", link.href),
            )
        })?;
        let absolute = if link.href.starts_with('/') {
            format!("{}{}", base_url, link.href)
        } else {
            link.href.clone()
        };
        chapters.push((id, link.text, absolute));
    }
    Ok(VolumePage {
        info,
        cover_url: cover.text("cover").to_string(),
        chapters,
    })
}

/// Source adapter for bilinovel. Owns the session it was opened with.
pub struct BilinovelSource {
    session: Session,
    paginator: Paginator,
    base_url: String,
}

impl BilinovelSource {
    pub fn new(session: Session) -> Self {
        Self::with_base_url(session, BASE_URL)
    }

    /// Adapter against a different origin (mirrors, local fixtures).
    pub fn with_base_url(session: Session, base_url: impl Into<String>) -> Self {
        let paginator = Paginator::new(
            session.client().clone(),
            session.resolver().clone(),
            session.glyphs().cloned(),
            &PROFILE,
            session.paginator_options(),
        );
        Self {
            session,
            paginator,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn novel_url(&self, novel_id: u32) -> String {
        format!("{}/novel/{}.html", self.base_url, novel_id)
    }

    fn catalog_url(&self, novel_id: u32) -> String {
        format!("{}/novel/{}/catalog", self.base_url, novel_id)
    }

    fn volume_url(&self, novel_id: u32, volume_id: u32) -> String {
        format!("{}/novel/{}/vol_{}.html", self.base_url, novel_id, volume_id)
    }

    fn chapter_url(&self, novel_id: u32, chapter_id: u32) -> String {
        format!("{}/novel/{}/{}.html", self.base_url, novel_id, chapter_id)
    }

    async fn fetch_html(&self, url: &str) -> Result<String, ScraperError> {
        Ok(self.session.client().fetch(url, &[]).await?.text())
    }

    async fn catalog(&self, novel_id: u32) -> Result<Catalog, ScraperError> {
        let url = self.catalog_url(novel_id);
        let html = self.fetch_html(&url).await?;
        let catalog = parse_catalog(&html, &url, novel_id)?;
        debug!(novel = novel_id, volumes = catalog.volume_ids.len(), "catalog parsed");
        Ok(catalog)
    }

    async fn fetch_volume(
        &self,
        novel_id: u32,
        volume_id: u32,
        series_index: u32,
        novel_title: &str,
        skip_chapters: bool,
    ) -> Result<Volume, ScraperError> {
        let url = self.volume_url(novel_id, volume_id);
        let html = self.fetch_html(&url).await?;
        let page = parse_volume_page(&html, &url, &self.base_url)?;
        let chapters = page
            .chapters
            .into_iter()
            .map(|(id, title, chapter_url)| Chapter {
                title,
                ..Chapter::new(novel_id, volume_id, id, chapter_url)
            })
            .collect();
        let mut volume = Volume {
            id: volume_id,
            novel_id,
            novel_title: novel_title.to_string(),
            series_index,
            title: page.info.title,
            description: page.info.description,
            authors: page.info.authors,
            url,
            cover_url: page.cover_url,
            cover: Vec::new(),
            chapters,
        };
        if skip_chapters {
            return Ok(volume);
        }

        if !volume.cover_url.is_empty() {
            match self
                .session
                .client()
                .fetch(&volume.cover_url, &[("Referer", PROFILE.referer)])
                .await
            {
                Ok(response) => volume.cover = response.body,
                Err(e) => warn!(volume = volume_id, error = %e, "cover download failed"),
            }
        }
        self.fetch_chapters(&mut volume).await?;
        info!(
            volume = volume_id,
            title = %volume.title,
            chapters = volume.chapters.len(),
            images = volume.image_count(),
            "volume downloaded"
        );
        Ok(volume)
    }

    /// Fetch all chapters of `volume` with bounded parallelism. Every chapter is
    /// attempted; the first failure in catalog order is returned afterwards.
    async fn fetch_chapters(&self, volume: &mut Volume) -> Result<(), ScraperError> {
        let novel_id = volume.novel_id;
        let volume_id = volume.id;
        let ids: Vec<u32> = volume.chapters.iter().map(|c| c.id).collect();
        let total = ids.len();

        let mut done = 0;
        let mut results: Vec<(usize, Result<Chapter, ScraperError>)> = stream::iter(
            ids.into_iter().enumerate(),
        )
        .map(|(index, chapter_id)| async move {
            (index, self.get_chapter(novel_id, volume_id, chapter_id).await)
        })
        .buffer_unordered(self.session.concurrency())
        .inspect(|_| {
            done += 1;
            self.session.report_progress(done, total);
        })
        .collect()
        .await;
        results.sort_by_key(|(index, _)| *index);

        let mut first_error = None;
        let mut failed = 0;
        for (index, result) in results {
            match result {
                Ok(mut chapter) => {
                    let slot = &mut volume.chapters[index];
                    if chapter.title.is_empty() {
                        chapter.title = std::mem::take(&mut slot.title);
                    }
                    if chapter.content.is_empty() {
                        warn!(chapter = chapter.id, title = %chapter.title, "chapter has no content");
                    }
                    *slot = chapter;
                }
                Err(e) => {
                    failed += 1;
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => {
                warn!(volume = volume_id, failed, total, "chapters failed");
                Err(e)
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl NovelSource for BilinovelSource {
    async fn get_novel(&self, novel_id: u32, skip_chapters: bool) -> Result<Novel, ScraperError> {
        let url = self.novel_url(novel_id);
        let html = self.fetch_html(&url).await?;
        let info = {
            let doc = Html::parse_document(&html);
            parse_book_info(&doc, &url)?
        };
        let catalog = self.catalog(novel_id).await?;

        let mut volumes = Vec::with_capacity(catalog.volume_ids.len());
        for (i, &volume_id) in catalog.volume_ids.iter().enumerate() {
            let volume = self
                .fetch_volume(novel_id, volume_id, i as u32 + 1, &info.title, skip_chapters)
                .await
                .map_err(|e| ScraperError::Volume {
                    novel_id,
                    volume_id,
                    source: Box::new(e),
                })?;
            volumes.push(volume);
        }
        info!(novel = novel_id, title = %info.title, volumes = volumes.len(), "novel resolved");
        Ok(Novel {
            id: novel_id,
            title: info.title,
            description: info.description,
            authors: info.authors,
            volumes,
        })
    }

    async fn get_volume(
        &self,
        novel_id: u32,
        volume_id: u32,
        skip_chapters: bool,
    ) -> Result<Volume, ScraperError> {
        let catalog = self.catalog(novel_id).await?;
        let series_index = catalog
            .series_index(volume_id)
            .ok_or(ScraperError::VolumeNotFound {
                novel_id,
                volume_id,
            })?;
        self.fetch_volume(
            novel_id,
            volume_id,
            series_index,
            &catalog.novel_title,
            skip_chapters,
        )
        .await
        .map_err(|e| ScraperError::Volume {
            novel_id,
            volume_id,
            source: Box::new(e),
        })
    }

    async fn get_chapter(
        &self,
        novel_id: u32,
        volume_id: u32,
        chapter_id: u32,
    ) -> Result<Chapter, ScraperError> {
        let mut chapter = Chapter::new(
            novel_id,
            volume_id,
            chapter_id,
            self.chapter_url(novel_id, chapter_id),
        );
        self.paginator
            .paginate(&mut chapter)
            .await
            .map_err(|e| ScraperError::Chapter {
                novel_id,
                chapter_id,
                source: Box::new(e),
            })?;
        debug!(chapter = chapter_id, title = %chapter.title, "chapter downloaded");
        Ok(chapter)
    }

    fn style_css(&self) -> &str {
        STYLE_CSS
    }

    fn extra_files(&self) -> Vec<ExtraFile> {
        Vec::new()
    }

    async fn close(&self) -> Result<(), ScraperError> {
        self.session.shutdown().await
    }
}
