//! Page-by-page chapter retrieval.
//!
//! A chapter is split over numbered pages. Each page is fetched, reordered by the
//! resolver, glyph-remapped when the page uses the substituted font, cleaned of
//! decorations, and its images are materialized. The cleaned fragment is appended to
//! the chapter before the next page is requested.

use super::client::FetchClient;
use super::content::{
    find_first, image_source, images, inner_xhtml, parse_fragment, parse_html, remap_subtree,
    remove_node, set_attr, strip, text_content, NodeMatch,
};
use super::error::ScraperError;
use super::glyph::{GlyphMapper, UnmappedGlyph};
use super::images::ImageMaterializer;
use super::resolver::{ReorderResolver, ResolveRequest, DEFAULT_RENDER_TIMEOUT};
use crate::model::Chapter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default cap on pages per chapter.
pub const DEFAULT_MAX_PAGES: u32 = 200;

/// Site constants that drive pagination.
#[derive(Debug, Clone, Copy)]
pub struct PageProfile {
    /// Sent as Referer on image downloads.
    pub referer: &'static str,
    /// Extra request headers for chapter pages.
    pub headers: &'static [(&'static str, &'static str)],
    /// Raw-page substring present while another page follows.
    pub next_marker: &'static str,
    /// Raw-page substring present when the substituted font is in use.
    pub font_marker: &'static str,
    pub title_selector: &'static str,
    pub content_selector: &'static str,
    /// Non-content nodes removed from the content container.
    pub decorations: &'static [&'static str],
    /// Resource whose load signals that the reorder script ran.
    pub signal_resource: &'static str,
}

#[derive(Debug, Clone)]
pub struct PaginatorOptions {
    /// Pause between consecutive pages of one chapter.
    pub page_delay: Duration,
    pub max_pages: u32,
    pub render_timeout: Duration,
    pub unmapped_glyph: UnmappedGlyph,
    /// Remove images instead of downloading them.
    pub text_only: bool,
}

impl Default for PaginatorOptions {
    fn default() -> Self {
        Self {
            page_delay: Duration::ZERO,
            max_pages: DEFAULT_MAX_PAGES,
            render_timeout: DEFAULT_RENDER_TIMEOUT,
            unmapped_glyph: UnmappedGlyph::default(),
            text_only: false,
        }
    }
}

/// URL of page `page` of the chapter at `chapter_url`: `.../123.html` becomes
/// `.../123_{page}.html`.
pub fn page_url(chapter_url: &str, page: u32) -> String {
    let base = chapter_url.strip_suffix(".html").unwrap_or(chapter_url);
    format!("{}_{}.html", base, page)
}

/// Result of the synchronous cleanup of one rendered page.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct CleanedPage {
    pub title: String,
    pub html: String,
    /// Image sources in document order.
    pub images: Vec<String>,
}

/// Parse the rendered page, keep the content container, strip decorations, remap the
/// last paragraph, and collect image sources (or drop images in text-only mode).
pub(crate) fn clean_page(
    rendered: &str,
    url: &str,
    profile: &PageProfile,
    glyphs: Option<(&dyn GlyphMapper, UnmappedGlyph)>,
    text_only: bool,
) -> Result<CleanedPage, ScraperError> {
    let dom = parse_html(rendered, url)?;
    let title = find_first(&dom.document, &NodeMatch::parse(profile.title_selector))
        .map(|node| text_content(&node))
        .unwrap_or_default();
    let Some(content) = find_first(&dom.document, &NodeMatch::parse(profile.content_selector))
    else {
        return Err(ScraperError::parse(
            "chapter page",
            url,
            format!("missing content container {}", profile.content_selector),
        ));
    };

    let decorations: Vec<NodeMatch<'_>> =
        profile.decorations.iter().map(|d| NodeMatch::parse(d)).collect();
    strip(&content, &decorations);

    if let Some((mapper, policy)) = glyphs {
        if let Some(last) = super::content::find_all(&content, &NodeMatch::Tag("p")).pop() {
            remap_subtree(&last, mapper, policy);
        }
    }

    let mut sources = Vec::new();
    for img in images(&content) {
        if text_only {
            remove_node(&img);
        } else if let Some(source) = image_source(&img) {
            sources.push(source);
        }
    }

    Ok(CleanedPage {
        title,
        html: inner_xhtml(&content).trim().to_string(),
        images: sources,
    })
}

/// Point each image at its stored filename and drop loader attributes. Images whose
/// download failed are removed.
pub(crate) fn rewrite_images(
    fragment: &str,
    stored: &HashMap<String, String>,
) -> Result<String, ScraperError> {
    let (_dom, body) = parse_fragment(fragment)?;
    for img in images(&body) {
        let Some(source) = image_source(&img) else {
            continue;
        };
        match stored.get(&source) {
            Some(filename) => {
                set_attr(&img, "src", Some(filename));
                set_attr(&img, "alt", Some(&source));
                set_attr(&img, "data-src", None);
                set_attr(&img, "class", None);
            }
            None => remove_node(&img),
        }
    }
    Ok(inner_xhtml(&body))
}

/// Drives the page loop for chapters of one source.
pub struct Paginator {
    client: Arc<FetchClient>,
    resolver: Arc<dyn ReorderResolver>,
    glyphs: Option<Arc<dyn GlyphMapper>>,
    images: ImageMaterializer,
    profile: &'static PageProfile,
    options: PaginatorOptions,
}

impl Paginator {
    pub fn new(
        client: Arc<FetchClient>,
        resolver: Arc<dyn ReorderResolver>,
        glyphs: Option<Arc<dyn GlyphMapper>>,
        profile: &'static PageProfile,
        options: PaginatorOptions,
    ) -> Self {
        let images = ImageMaterializer::new(client.clone(), profile.referer);
        Self {
            client,
            resolver,
            glyphs,
            images,
            profile,
            options,
        }
    }

    /// Fetch every page of `chapter`, appending content in page order. Stops at the
    /// first page without the next-page marker.
    pub async fn paginate(&self, chapter: &mut Chapter) -> Result<(), ScraperError> {
        let mut page = 1;
        loop {
            if page > self.options.max_pages {
                return Err(ScraperError::PageLimit {
                    chapter_id: chapter.id,
                    limit: self.options.max_pages,
                });
            }
            let has_next =
                self.fetch_page(chapter, page)
                    .await
                    .map_err(|e| ScraperError::Page {
                        chapter_id: chapter.id,
                        page,
                        source: Box::new(e),
                    })?;
            if !has_next {
                debug!(chapter = chapter.id, pages = page, "chapter complete");
                return Ok(());
            }
            page += 1;
            if !self.options.page_delay.is_zero() {
                tokio::time::sleep(self.options.page_delay).await;
            }
        }
    }

    async fn fetch_page(&self, chapter: &mut Chapter, page: u32) -> Result<bool, ScraperError> {
        let url = page_url(&chapter.url, page);
        let raw = self.client.fetch(&url, self.profile.headers).await?.text();
        let has_next = raw.contains(self.profile.next_marker);
        let obfuscated = raw.contains(self.profile.font_marker);

        let request = ResolveRequest::new(self.profile.content_selector, self.profile.signal_resource)
            .with_timeout(self.options.render_timeout);
        let rendered = self.resolver.resolve(&raw, &request).await?;

        let glyphs = match (&self.glyphs, obfuscated) {
            (Some(mapper), true) => Some((mapper.as_ref(), self.options.unmapped_glyph)),
            (None, true) => {
                warn!(url = %url, "page uses the substituted font but no glyph map is loaded");
                None
            }
            _ => None,
        };
        let cleaned = clean_page(&rendered, &url, self.profile, glyphs, self.options.text_only)?;
        if page == 1 && !cleaned.title.is_empty() {
            chapter.title = cleaned.title;
        }

        let fragment = if cleaned.images.is_empty() {
            cleaned.html
        } else {
            let mut stored = HashMap::new();
            for (source, result) in self.images.materialize_all(&cleaned.images, &url).await {
                match result {
                    Ok(image) => {
                        stored.insert(source, image.filename.clone());
                        chapter.content.insert_image(image.filename, image.bytes);
                    }
                    Err(e) => warn!(url = %url, image = %source, error = %e, "image skipped"),
                }
            }
            rewrite_images(&cleaned.html, &stored)?
        };
        debug!(url = %url, bytes = fragment.len(), has_next, "page fetched");
        chapter.content.append_fragment(&fragment);
        Ok(has_next)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::super::client::tests::{status, ScriptedTransport};
    use super::super::images::content_addressed_name;
    use super::super::resolver::PassthroughResolver;
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) const NEXT: &str = "<a onclick=\"next()\">next</a>";

    pub(crate) static PROFILE: PageProfile = PageProfile {
        referer: "https://site.test",
        headers: &[("Cookie", "night=1;")],
        next_marker: NEXT,
        font_marker: "font-family: \"read\"",
        title_selector: "#atitle",
        content_selector: "#acontent",
        decorations: &[".cgo", "center", ".google-auto-placed"],
        signal_resource: "chapterlog.js",
    };

    pub(crate) fn page_html(title: &str, body: &str, has_next: bool) -> String {
        format!(
            "<html><body><h1 id=\"atitle\">{}</h1><div id=\"acontent\">{}</div>{}</body></html>",
            title,
            body,
            if has_next { NEXT } else { "" }
        )
    }

    fn paginator(
        transport: Arc<ScriptedTransport>,
        resolver: Arc<dyn ReorderResolver>,
        glyphs: Option<Arc<dyn GlyphMapper>>,
        options: PaginatorOptions,
    ) -> Paginator {
        let client = Arc::new(
            FetchClient::builder()
                .transport(transport)
                .retry_count(1)
                .build()
                .unwrap(),
        );
        Paginator::new(client, resolver, glyphs, &PROFILE, options)
    }

    #[test]
    fn page_urls_follow_chapter_url() {
        assert_eq!(
            page_url("https://site.test/novel/1/22.html", 1),
            "https://site.test/novel/1/22_1.html"
        );
        assert_eq!(
            page_url("https://site.test/novel/1/22.html", 3),
            "https://site.test/novel/1/22_3.html"
        );
    }

    #[tokio::test]
    async fn fetches_until_marker_disappears() {
        let transport = Arc::new(ScriptedTransport::new());
        let base = "https://site.test/novel/1/22";
        transport.serve(&format!("{base}_1.html"), page_html("第一章", "<p>one</p>", true));
        transport.serve(&format!("{base}_2.html"), page_html("ignored", "<p>two</p>", true));
        transport.serve(&format!("{base}_3.html"), page_html("ignored", "<p>three</p>", false));
        let p = paginator(
            transport.clone(),
            Arc::new(PassthroughResolver),
            None,
            PaginatorOptions::default(),
        );

        let mut chapter = Chapter::new(1, 5, 22, format!("{base}.html"));
        p.paginate(&mut chapter).await.unwrap();

        assert_eq!(transport.call_count(), 3);
        assert_eq!(chapter.title, "第一章");
        assert_eq!(chapter.content.html, "<p>one</p><p>two</p><p>three</p>");
    }

    #[tokio::test]
    async fn endless_pages_hit_the_cap() {
        let transport = Arc::new(ScriptedTransport::new());
        for page in 1..=4 {
            transport.serve(
                &format!("https://site.test/novel/1/9_{page}.html"),
                page_html("t", "<p>x</p>", true),
            );
        }
        let options = PaginatorOptions {
            max_pages: 3,
            ..PaginatorOptions::default()
        };
        let p = paginator(transport.clone(), Arc::new(PassthroughResolver), None, options);
        let mut chapter = Chapter::new(1, 5, 9, "https://site.test/novel/1/9.html");
        let err = p.paginate(&mut chapter).await.unwrap_err();
        assert!(matches!(err, ScraperError::PageLimit { limit: 3, .. }));
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn failed_page_reports_page_number() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.serve(
            "https://site.test/novel/1/9_1.html",
            page_html("t", "<p>x</p>", true),
        );
        transport.push("https://site.test/novel/1/9_2.html", Ok(status(500)));
        let p = paginator(
            transport,
            Arc::new(PassthroughResolver),
            None,
            PaginatorOptions::default(),
        );
        let mut chapter = Chapter::new(1, 5, 9, "https://site.test/novel/1/9.html");
        let err = p.paginate(&mut chapter).await.unwrap_err();
        assert!(matches!(err, ScraperError::Page { page: 2, chapter_id: 9, .. }));
    }

    /// Resolver that reverses the paragraph order, standing in for the reorder script.
    struct ReversingResolver;

    #[async_trait]
    impl ReorderResolver for ReversingResolver {
        async fn resolve(&self, raw: &str, _: &ResolveRequest) -> Result<String, ScraperError> {
            Ok(raw.replace("<p>2</p><p>1</p>", "<p>1</p><p>2</p>"))
        }
    }

    #[tokio::test]
    async fn content_comes_from_resolved_page() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.serve(
            "https://site.test/novel/1/3_1.html",
            page_html("t", "<p>2</p><p>1</p>", false),
        );
        let p = paginator(
            transport,
            Arc::new(ReversingResolver),
            None,
            PaginatorOptions::default(),
        );
        let mut chapter = Chapter::new(1, 5, 3, "https://site.test/novel/1/3.html");
        p.paginate(&mut chapter).await.unwrap();
        assert_eq!(chapter.content.html, "<p>1</p><p>2</p>");
    }

    /// Resolver whose render never finishes in time.
    #[derive(Default)]
    struct TimingOutResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReorderResolver for TimingOutResolver {
        async fn resolve(&self, _: &str, request: &ResolveRequest) -> Result<String, ScraperError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ScraperError::RenderTimeout {
                timeout: request.timeout,
            })
        }
    }

    #[tokio::test]
    async fn render_timeout_fails_the_page_without_retry() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.serve(
            "https://site.test/novel/1/8_1.html",
            page_html("t", "<p>x</p>", true),
        );
        let resolver = Arc::new(TimingOutResolver::default());
        let options = PaginatorOptions {
            render_timeout: Duration::from_secs(3),
            ..PaginatorOptions::default()
        };
        let p = paginator(transport.clone(), resolver.clone(), None, options);
        let mut chapter = Chapter::new(1, 5, 8, "https://site.test/novel/1/8.html");
        let err = p.paginate(&mut chapter).await.unwrap_err();

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.call_count(), 1);
        match err {
            ScraperError::Page {
                chapter_id: 8,
                page: 1,
                source,
            } => assert!(matches!(
                *source,
                ScraperError::RenderTimeout { timeout } if timeout == Duration::from_secs(3)
            )),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(chapter.content.is_empty());
    }

    #[tokio::test]
    async fn flagged_pages_remap_last_paragraph_only() {
        let transport = Arc::new(ScriptedTransport::new());
        let body = "<style>p:last-of-type{font-family: \"read\"}</style><p>ab</p><p>ab</p>";
        transport.serve("https://site.test/novel/1/4_1.html", page_html("t", body, false));
        let swap: Arc<dyn GlyphMapper> = Arc::new(|c: char| match c {
            'a' => Some('b'),
            'b' => Some('a'),
            _ => None,
        });
        let p = paginator(
            transport,
            Arc::new(PassthroughResolver),
            Some(swap),
            PaginatorOptions::default(),
        );
        let mut chapter = Chapter::new(1, 5, 4, "https://site.test/novel/1/4.html");
        p.paginate(&mut chapter).await.unwrap();
        assert!(chapter.content.html.ends_with("<p>ab</p><p>ba</p>"));
    }

    #[tokio::test]
    async fn images_are_materialized_and_rewritten() {
        let transport = Arc::new(ScriptedTransport::new());
        let good = "https://img.test/a.jpg";
        let body = format!(
            "<p>x</p><img class=\"imagecontent lazyload\" data-src=\"{good}\" src=\"/l.gif\"><div class=\"cgo\">ad</div><img src=\"https://img.test/gone.png\"><img src=\"{good}\">"
        );
        transport.serve("https://site.test/novel/1/6_1.html", page_html("t", &body, false));
        transport.serve(good, vec![7u8, 7, 7]);
        let p = paginator(
            transport.clone(),
            Arc::new(PassthroughResolver),
            None,
            PaginatorOptions::default(),
        );
        let mut chapter = Chapter::new(1, 5, 6, "https://site.test/novel/1/6.html");
        p.paginate(&mut chapter).await.unwrap();

        let name = content_addressed_name(good);
        assert_eq!(chapter.content.images.len(), 1);
        assert_eq!(chapter.content.images[&name], vec![7, 7, 7]);
        assert_eq!(
            chapter.content.html,
            format!(
                "<p>x</p><img src=\"{name}\" alt=\"{good}\"/><img src=\"{name}\" alt=\"{good}\"/>"
            )
        );
        assert_eq!(transport.calls_to(good), 1);
    }

    #[tokio::test]
    async fn text_only_drops_images_without_fetching() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.serve(
            "https://site.test/novel/1/7_1.html",
            page_html("t", "<p>x<img src=\"https://img.test/a.jpg\"></p>", false),
        );
        let options = PaginatorOptions {
            text_only: true,
            ..PaginatorOptions::default()
        };
        let p = paginator(transport.clone(), Arc::new(PassthroughResolver), None, options);
        let mut chapter = Chapter::new(1, 5, 7, "https://site.test/novel/1/7.html");
        p.paginate(&mut chapter).await.unwrap();
        assert_eq!(chapter.content.html, "<p>x</p>");
        assert_eq!(transport.call_count(), 1);
    }

    #[test]
    fn rewritten_fragment_is_stable_with_style_blocks() {
        let stored = HashMap::from([("https://img.test/a.jpg".to_string(), "a.jpg".to_string())]);
        let fragment = "<style>a > b</style><p>x</p><img src=\"https://img.test/a.jpg\"><style>#acontent > p{color:red}</style>";
        let once = rewrite_images(fragment, &stored).unwrap();
        assert_eq!(once, "<p>x</p><img src=\"a.jpg\" alt=\"https://img.test/a.jpg\"/>");
        let twice = rewrite_images(&once, &HashMap::from([("a.jpg".to_string(), "a.jpg".to_string())]))
            .unwrap();
        assert_eq!(twice, "<p>x</p><img src=\"a.jpg\" alt=\"a.jpg\"/>");
        assert!(!twice.contains("&amp;"));
    }

    #[test]
    fn missing_content_container_is_parse_error() {
        let err = clean_page("<html><body></body></html>", "u", &PROFILE, None, false).unwrap_err();
        assert!(matches!(err, ScraperError::Parse { .. }));
    }
}
