//! Remote page fetching
//!
//! A remote resource is its root page plus the same-host pages it links to.
//! Pages are fetched with per-host rate limiting and converted from HTML to
//! plain text before indexing.

mod rate_limit;

pub use rate_limit::*;

use crate::config::CrawlConfig;
use crate::error::{Error, Result};
use crate::pipeline::RawDocument;
use futures::stream::{self, StreamExt};
use regex::Regex;
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

static SCRIPT_STYLE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)<(script|style|noscript)[^>]*>.*?</(script|style|noscript)>").ok());
static BLANK_LINES_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\n{3,}").ok());

/// Width used when rendering HTML as text
const TEXT_WIDTH: usize = 120;

/// Convert an HTML page to plain text
pub fn html_to_text(html: &str) -> String {
    let stripped = match SCRIPT_STYLE_RE.as_ref() {
        Some(re) => re.replace_all(html, ""),
        None => html.into(),
    };

    let text = html2text::from_read(stripped.as_bytes(), TEXT_WIDTH)
        .unwrap_or_else(|_| stripped.to_string());

    let text = match BLANK_LINES_RE.as_ref() {
        Some(re) => re.replace_all(&text, "\n\n").into_owned(),
        None => text,
    };
    text.trim().to_string()
}

/// Fetches remote pages
pub struct Crawler {
    client: Client,
    limiter: HostRateLimiter,
    max_links: usize,
}

impl Crawler {
    /// Create a new crawler
    pub fn new(config: &CrawlConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Crawl(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            limiter: HostRateLimiter::new(config.rate_limit_per_host),
            max_links: config.max_links,
        })
    }

    async fn rate_limit(&self, url: &Url) -> Result<()> {
        let host = url
            .host_str()
            .ok_or_else(|| Error::Crawl(format!("URL has no host: {}", url)))?;
        self.limiter.wait(host).await;
        Ok(())
    }

    /// Whether a HEAD request answers 200, 301 or 302
    pub async fn exists(&self, url: &str) -> bool {
        let result = async {
            let parsed = Url::parse(url)?;
            self.rate_limit(&parsed).await?;
            let response = self.client.head(parsed).send().await?;
            Ok::<_, Error>(response.status())
        }
        .await;

        match result {
            Ok(status) => matches!(
                status,
                StatusCode::OK | StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND
            ),
            Err(e) => {
                error!("Error checking if URL exists {}: {}", url, e);
                false
            }
        }
    }

    /// GET a page and return its body
    pub async fn fetch_html(&self, url: &str) -> Result<String> {
        let parsed = Url::parse(url)?;
        self.rate_limit(&parsed).await?;

        debug!("Fetching: {}", url);
        let response = self.client.get(parsed).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Crawl(format!("HTTP {}: {}", status, url)));
        }
        Ok(response.text().await?)
    }

    /// GET a page and return it as plain text
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let html = self.fetch_html(url).await?;
        Ok(html_to_text(&html))
    }

    /// Same-host links of a page, resolved against `base`
    ///
    /// Fragments are dropped, duplicates and the base itself are skipped,
    /// and at most `max_links` links are returned in page order.
    pub fn discover_links(&self, base: &str, html: &str) -> Vec<String> {
        let Ok(base_url) = Url::parse(base) else {
            return Vec::new();
        };
        let Ok(selector) = Selector::parse("a[href]") else {
            return Vec::new();
        };

        let mut base_key = base_url.clone();
        base_key.set_fragment(None);

        let document = Html::parse_document(html);
        let mut seen: HashSet<String> = HashSet::from([base_key.to_string()]);
        let mut links = Vec::new();

        for element in document.select(&selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            let Ok(mut link) = base_url.join(href.trim()) else {
                continue;
            };
            if !matches!(link.scheme(), "http" | "https") {
                continue;
            }
            if link.host_str() != base_url.host_str() {
                continue;
            }
            link.set_fragment(None);

            let link = link.to_string();
            if seen.insert(link.clone()) {
                links.push(link);
                if links.len() >= self.max_links {
                    break;
                }
            }
        }

        links
    }

    /// Fetch a root page and the pages it links to
    ///
    /// A failure on the root page is an error; failures on linked pages are
    /// logged and skipped.
    pub async fn fetch_site(&self, url: &str, concurrency: usize) -> Result<Vec<RawDocument>> {
        let html = self.fetch_html(url).await?;
        let links = self.discover_links(url, &html);
        info!("Found {} sub links under {}", links.len(), url);

        let mut documents = vec![RawDocument::from_page(url, html_to_text(&html))];

        let pages: Vec<Option<RawDocument>> = stream::iter(links)
            .map(|link| async move {
                match self.fetch_text(&link).await {
                    Ok(text) => Some(RawDocument::from_page(&link, text)),
                    Err(e) => {
                        warn!("Error fetching {}: {}", link, e);
                        None
                    }
                }
            })
            .buffered(concurrency.max(1))
            .collect()
            .await;

        documents.extend(pages.into_iter().flatten());
        debug!("Fetched {} pages for {}", documents.len(), url);
        Ok(documents)
    }
}
