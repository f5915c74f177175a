//! Downloader session: the fetch client, rendering context, and glyph map shared by
//! every request of one run.

use super::client::FetchClient;
use super::error::ScraperError;
use super::glyph::{GlyphMapper, TableGlyphMapper, UnmappedGlyph};
use super::paginator::{PaginatorOptions, DEFAULT_MAX_PAGES};
use super::resolver::{ReorderResolver, DEFAULT_RENDER_TIMEOUT};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Resolved settings for a session. Built from defaults, the config file, and CLI
/// flags, in increasing priority.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub user_agent: Option<String>,
    pub timeout_secs: u64,
    /// Bound on in-flight requests and on chapters fetched in parallel.
    pub concurrency: usize,
    pub retry_count: u32,
    pub retry_backoff: Duration,
    pub page_delay: Duration,
    pub max_pages: u32,
    pub render_timeout: Duration,
    pub chrome_path: Option<PathBuf>,
    pub glyph_map: Option<PathBuf>,
    pub unmapped_glyph: UnmappedGlyph,
    pub text_only: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout_secs: 30,
            concurrency: 10,
            retry_count: 10,
            retry_backoff: Duration::from_secs(3),
            page_delay: Duration::ZERO,
            max_pages: DEFAULT_MAX_PAGES,
            render_timeout: DEFAULT_RENDER_TIMEOUT,
            chrome_path: None,
            glyph_map: None,
            unmapped_glyph: UnmappedGlyph::default(),
            text_only: false,
        }
    }
}

/// Called with (chapters finished, chapters in the volume) each time a chapter of a
/// volume completes, whether it succeeded or not.
pub type ChapterProgress = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Singly owned per run. Dropping a session without [Session::close] leaves the
/// rendering context to be reaped with the process.
pub struct Session {
    config: SessionConfig,
    client: Arc<FetchClient>,
    resolver: Arc<dyn ReorderResolver>,
    glyphs: Option<Arc<dyn GlyphMapper>>,
    progress: Option<ChapterProgress>,
}

impl Session {
    /// Create the fetch client, load the glyph map, and start the rendering context.
    pub async fn open(config: SessionConfig) -> Result<Self, ScraperError> {
        let mut builder = FetchClient::builder()
            .timeout_secs(config.timeout_secs)
            .concurrency(config.concurrency)
            .retry_count(config.retry_count)
            .backoff(config.retry_backoff);
        if let Some(ua) = &config.user_agent {
            builder = builder.user_agent(ua.clone());
        }
        let client = Arc::new(builder.build()?);

        let glyphs = match &config.glyph_map {
            Some(path) => {
                let table = TableGlyphMapper::from_json_file(path)?;
                info!(path = %path.display(), entries = table.len(), "glyph map loaded");
                Some(Arc::new(table) as Arc<dyn GlyphMapper>)
            }
            None => None,
        };

        let resolver = open_resolver(&config).await?;
        Ok(Self::with_parts(config, client, resolver, glyphs))
    }

    /// Assemble a session from existing parts.
    pub fn with_parts(
        config: SessionConfig,
        client: Arc<FetchClient>,
        resolver: Arc<dyn ReorderResolver>,
        glyphs: Option<Arc<dyn GlyphMapper>>,
    ) -> Self {
        Self {
            config,
            client,
            resolver,
            glyphs,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ChapterProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub(crate) fn report_progress(&self, done: usize, total: usize) {
        if let Some(progress) = &self.progress {
            progress(done, total);
        }
    }

    pub fn client(&self) -> &Arc<FetchClient> {
        &self.client
    }

    pub fn resolver(&self) -> &Arc<dyn ReorderResolver> {
        &self.resolver
    }

    pub fn glyphs(&self) -> Option<&Arc<dyn GlyphMapper>> {
        self.glyphs.as_ref()
    }

    /// Parallel chapter fetches per volume.
    pub fn concurrency(&self) -> usize {
        self.config.concurrency.max(1)
    }

    pub fn paginator_options(&self) -> PaginatorOptions {
        PaginatorOptions {
            page_delay: self.config.page_delay,
            max_pages: self.config.max_pages,
            render_timeout: self.config.render_timeout,
            unmapped_glyph: self.config.unmapped_glyph,
            text_only: self.config.text_only,
        }
    }

    /// Release the rendering context.
    pub async fn close(self) -> Result<(), ScraperError> {
        self.shutdown().await
    }

    pub(crate) async fn shutdown(&self) -> Result<(), ScraperError> {
        self.resolver.close().await
    }
}

#[cfg(feature = "chrome")]
async fn open_resolver(config: &SessionConfig) -> Result<Arc<dyn ReorderResolver>, ScraperError> {
    let resolver = super::chrome::ChromeResolver::launch(config.chrome_path.as_deref()).await?;
    Ok(Arc::new(resolver))
}

#[cfg(not(feature = "chrome"))]
async fn open_resolver(_config: &SessionConfig) -> Result<Arc<dyn ReorderResolver>, ScraperError> {
    tracing::warn!("built without the chrome feature; pages are used in served order");
    Ok(Arc::new(super::resolver::PassthroughResolver))
}

#[cfg(test)]
mod tests {
    use super::super::client::tests::ScriptedTransport;
    use super::super::resolver::{ResolveRequest, PassthroughResolver};
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingResolver {
        closes: AtomicUsize,
    }

    #[async_trait]
    impl ReorderResolver for CountingResolver {
        async fn resolve(&self, raw: &str, _: &ResolveRequest) -> Result<String, ScraperError> {
            Ok(raw.to_string())
        }

        async fn close(&self) -> Result<(), ScraperError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn client() -> Arc<FetchClient> {
        Arc::new(
            FetchClient::builder()
                .transport(Arc::new(ScriptedTransport::new()))
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn close_releases_resolver() {
        let resolver = Arc::new(CountingResolver::default());
        let session = Session::with_parts(SessionConfig::default(), client(), resolver.clone(), None);
        session.close().await.unwrap();
        assert_eq!(resolver.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn paginator_options_follow_config() {
        let config = SessionConfig {
            page_delay: Duration::from_millis(250),
            max_pages: 12,
            text_only: true,
            unmapped_glyph: UnmappedGlyph::Keep,
            ..SessionConfig::default()
        };
        let session = Session::with_parts(config, client(), Arc::new(PassthroughResolver), None);
        let options = session.paginator_options();
        assert_eq!(options.page_delay, Duration::from_millis(250));
        assert_eq!(options.max_pages, 12);
        assert!(options.text_only);
        assert_eq!(options.unmapped_glyph, UnmappedGlyph::Keep);
    }
}
