use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use scraper::{Html, Selector};
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("pima_prices/", env!("CARGO_PKG_VERSION"));
const MAX_FRAME_DEPTH: usize = 3;

static FRAME_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("iframe[src], frame[src]").unwrap());

/// One loaded document: the page itself or one of its nested frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub url: Url,
    pub html: String,
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A browsing context the pipeline drives: it navigates, scrolls, exposes
/// its frames, and downloads with the cookies navigation established.
#[async_trait]
pub trait PageSession: Send + Sync {
    /// Load `url` and return once its network activity has settled.
    async fn navigate(&mut self, url: &Url) -> Result<()>;
    async fn scroll_height(&self) -> Result<u64>;
    async fn scroll_by(&mut self, step: u64) -> Result<()>;
    /// Main document first, then nested frames.
    async fn frames(&self) -> Result<Vec<Frame>>;
    async fn fetch(&self, url: &Url) -> Result<FetchResponse>;
}

/// Plain-HTTP session. Documents are static, so a page is fully loaded once
/// its body has been read and there is nothing left to scroll. No script
/// runs: anchors a page only inserts from JavaScript or on lazy load are
/// never seen here.
pub struct HttpSession {
    client: reqwest::Client,
    frames: Vec<Frame>,
}

impl HttpSession {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            frames: Vec::new(),
        })
    }

    async fn get_text(&self, url: &Url) -> Result<String> {
        let text = self
            .client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
            .with_context(|| format!("Failed to read {}", url))?;
        Ok(text)
    }

    /// Breadth-first walk of `<iframe>`/`<frame>` sources below the page.
    async fn load_frames(&self, page: &Frame) -> Vec<Frame> {
        let mut seen: HashSet<Url> = HashSet::from([page.url.clone()]);
        let mut loaded = Vec::new();
        let mut level = frame_sources(page);

        for depth in 1..=MAX_FRAME_DEPTH {
            let mut next = Vec::new();
            for url in level {
                if !seen.insert(url.clone()) {
                    continue;
                }
                match self.get_text(&url).await {
                    Ok(html) => {
                        debug!(%url, depth, "Loaded frame");
                        let frame = Frame { url, html };
                        next.extend(frame_sources(&frame));
                        loaded.push(frame);
                    }
                    Err(e) => warn!(%url, "Frame failed to load: {:#}", e),
                }
            }
            if next.is_empty() {
                break;
            }
            level = next;
        }

        loaded
    }
}

#[async_trait]
impl PageSession for HttpSession {
    async fn navigate(&mut self, url: &Url) -> Result<()> {
        let html = self
            .get_text(url)
            .await
            .with_context(|| format!("Failed to load bulletin page {}", url))?;
        let page = Frame {
            url: url.clone(),
            html,
        };
        let children = self.load_frames(&page).await;
        self.frames = std::iter::once(page).chain(children).collect();
        Ok(())
    }

    async fn scroll_height(&self) -> Result<u64> {
        Ok(0)
    }

    async fn scroll_by(&mut self, _step: u64) -> Result<()> {
        Ok(())
    }

    async fn frames(&self) -> Result<Vec<Frame>> {
        if self.frames.is_empty() {
            anyhow::bail!("No page loaded; navigate first");
        }
        Ok(self.frames.clone())
    }

    async fn fetch(&self, url: &Url) -> Result<FetchResponse> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .with_context(|| format!("Failed to download {}", url))?;
        Ok(FetchResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// Absolute URLs of the frames embedded in `frame`, in document order.
pub fn frame_sources(frame: &Frame) -> Vec<Url> {
    let document = Html::parse_document(&frame.html);
    document
        .select(&FRAME_SEL)
        .filter_map(|el| el.value().attr("src"))
        .map(str::trim)
        .filter(|src| !src.is_empty() && !src.starts_with("about:") && !src.starts_with("javascript:"))
        .filter_map(|src| frame.url.join(src).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str, url: &str) -> Frame {
        Frame {
            url: Url::parse(url).unwrap(),
            html: std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap(),
        }
    }

    #[test]
    fn finds_nested_frame_sources() {
        let page = fixture("bulletin", "https://www.pima.go.cr/boletin/");
        let urls: Vec<String> = frame_sources(&page).into_iter().map(String::from).collect();
        assert_eq!(
            urls,
            vec![
                "https://www.pima.go.cr/boletin/embed/documentos.html".to_string(),
                "https://cdn.pima.go.cr/widgets/archivo.html".to_string(),
            ]
        );
    }

    #[test]
    fn frame_without_children_has_no_sources() {
        let frame = fixture("documentos_frame", "https://www.pima.go.cr/boletin/embed/documentos.html");
        assert!(frame_sources(&frame).is_empty());
    }

    #[test]
    fn success_status_range() {
        let ok = FetchResponse { status: 200, body: vec![] };
        let missing = FetchResponse { status: 404, body: vec![] };
        assert!(ok.is_success());
        assert!(!missing.is_success());
    }

    #[tokio::test]
    async fn static_session_has_nothing_to_scroll() {
        let mut session = HttpSession::new(Duration::from_secs(5)).unwrap();
        assert_eq!(session.scroll_height().await.unwrap(), 0);
        session.scroll_by(100).await.unwrap();
        assert_eq!(session.scroll_height().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn frames_require_navigation() {
        let session = HttpSession::new(Duration::from_secs(5)).unwrap();
        assert!(session.frames().await.is_err());
    }
}
