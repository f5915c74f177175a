//! Headless Chromium implementation of [ReorderResolver].
//!
//! One browser is launched per session. Each render opens a fresh tab on a temporary
//! file holding the raw page, waits for the signal resource to finish loading and for
//! the content selector to appear, reads the DOM, and closes the tab.

use super::error::ScraperError;
use super::resolver::{ReorderResolver, ResolveRequest};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFinished, EventRequestWillBeSent, RequestId,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures_util::StreamExt;
use reqwest::Url;
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Longest wait for the signal resource before falling back to polling the selector.
const SIGNAL_GRACE: Duration = Duration::from_secs(10);

pub struct ChromeResolver {
    browser: Mutex<Option<Browser>>,
    handler: Mutex<Option<JoinHandle<()>>>,
}

fn render_error(e: CdpError) -> ScraperError {
    ScraperError::Render {
        reason: e.to_string(),
    }
}

impl ChromeResolver {
    /// Launch a headless browser. `chrome_path` overrides executable discovery.
    pub async fn launch(chrome_path: Option<&Path>) -> Result<Self, ScraperError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage");
        if let Some(path) = chrome_path {
            builder = builder.chrome_executable(path);
        }
        let config = builder
            .build()
            .map_err(|reason| ScraperError::Render { reason })?;
        let (browser, mut handler) = Browser::launch(config).await.map_err(render_error)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser handler event failed");
                }
            }
        });
        info!("rendering context started");
        Ok(Self {
            browser: Mutex::new(Some(browser)),
            handler: Mutex::new(Some(handler)),
        })
    }

    async fn open_page(&self) -> Result<Page, ScraperError> {
        let guard = self.browser.lock().await;
        let browser = guard.as_ref().ok_or_else(|| ScraperError::Render {
            reason: "rendering context is closed".to_string(),
        })?;
        browser.new_page("about:blank").await.map_err(render_error)
    }
}

async fn render(page: &Page, file_url: &str, request: &ResolveRequest) -> Result<String, CdpError> {
    let mut requests = page.event_listener::<EventRequestWillBeSent>().await?;
    let mut finished = page.event_listener::<EventLoadingFinished>().await?;
    page.goto(file_url).await?;

    let signal = async {
        let mut signal_id: Option<RequestId> = None;
        let mut done: HashSet<RequestId> = HashSet::new();
        loop {
            tokio::select! {
                Some(event) = requests.next() => {
                    if event.request.url.contains(&request.signal_resource) {
                        let id = event.request_id.clone();
                        if done.contains(&id) {
                            return;
                        }
                        signal_id = Some(id);
                    }
                }
                Some(event) = finished.next() => {
                    let id = event.request_id.clone();
                    if signal_id.as_ref() == Some(&id) {
                        return;
                    }
                    done.insert(id);
                }
                else => return,
            }
        }
    };
    if tokio::time::timeout(SIGNAL_GRACE.min(request.timeout), signal)
        .await
        .is_err()
    {
        debug!(resource = %request.signal_resource, "signal resource not observed");
    }

    while page.find_element(request.wait_selector.as_str()).await.is_err() {
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    page.content().await
}

#[async_trait]
impl ReorderResolver for ChromeResolver {
    async fn resolve(&self, raw_html: &str, request: &ResolveRequest) -> Result<String, ScraperError> {
        let io_error = |e: std::io::Error| ScraperError::Render {
            reason: format!("temporary page: {}", e),
        };
        let mut file = tempfile::Builder::new()
            .prefix("bilidown-")
            .suffix(".html")
            .tempfile()
            .map_err(io_error)?;
        file.write_all(raw_html.as_bytes()).map_err(io_error)?;
        file.flush().map_err(io_error)?;
        let file_url = Url::from_file_path(file.path())
            .map_err(|_| ScraperError::Render {
                reason: format!("cannot address {} as a file URL", file.path().display()),
            })?
            .to_string();

        // One deadline covers opening the tab and rendering in it.
        let deadline = tokio::time::Instant::now() + request.timeout;
        let timed_out = || ScraperError::RenderTimeout {
            timeout: request.timeout,
        };
        let page = tokio::time::timeout_at(deadline, self.open_page())
            .await
            .map_err(|_| timed_out())??;
        let outcome = tokio::time::timeout_at(deadline, render(&page, &file_url, request)).await;
        if let Err(e) = page.close().await {
            warn!(error = %e, "failed to close render tab");
        }
        match outcome {
            Err(_) => Err(timed_out()),
            Ok(result) => result.map_err(render_error),
        }
    }

    async fn close(&self) -> Result<(), ScraperError> {
        let browser = self.browser.lock().await.take();
        let Some(mut browser) = browser else {
            return Ok(());
        };
        let closed = browser.close().await;
        if let Some(handler) = self.handler.lock().await.take() {
            handler.abort();
        }
        info!("rendering context closed");
        closed.map(|_| ()).map_err(render_error)
    }
}
