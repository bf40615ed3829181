use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use url::Url;

use crate::error::FetchError;
use crate::models::{extract_domain, ArticleCandidate};

const SNIPPET_CHARS: usize = 200;
const MIN_TEXT_LEN: usize = 100;

/// Yields raw candidates for a run.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    async fn fetch(&self, max_count: usize) -> Result<Vec<ArticleCandidate>, FetchError>;
}

/// Discovers article links on news front pages and extracts each article.
///
/// `max_count` is shared evenly across the configured sites. A site that cannot be reached
/// is logged and skipped.
pub struct WebSource {
    client: Client,
    sites: Vec<String>,
    semaphore: Arc<Semaphore>,
}

impl WebSource {
    pub fn new(sites: Vec<String>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (compatible; NewsDigest/1.0)")
            .build()
            .context("Failed to create HTTP client")?;

        let semaphore = Arc::new(Semaphore::new(10));

        Ok(Self {
            client,
            sites,
            semaphore,
        })
    }

    async fn get_html(&self, url: &str) -> Result<Option<String>, FetchError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| FetchError::Parse(e.to_string()))?;

        for attempt in 0..3u32 {
            match self.try_get_html(url).await {
                Ok(html) => return Ok(html),
                Err(e) => {
                    if attempt == 2 {
                        return Err(e);
                    }
                    let backoff = std::time::Duration::from_millis(500 * 2_u64.pow(attempt));
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        Ok(None)
    }

    async fn try_get_html(&self, url: &str) -> Result<Option<String>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Http {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if status == 401 || status == 403 || status == 404 {
            return Ok(None);
        }

        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let html = response.text().await.map_err(|source| FetchError::Http {
            url: url.to_string(),
            source,
        })?;

        Ok(Some(html))
    }

    async fn fetch_site(&self, site: &str, limit: usize) -> Result<Vec<ArticleCandidate>, FetchError> {
        let html = self
            .get_html(site)
            .await?
            .ok_or_else(|| FetchError::Parse(format!("front page {} unavailable", site)))?;

        let links = discover_links(site, &html)?;
        info!("Found {} article links on {}", links.len(), site);

        // Front pages list the important stories first; sample twice the limit to allow misses.
        let sampled: Vec<String> = links.into_iter().take(limit * 2).collect();
        let articles: Vec<Option<ArticleCandidate>> = stream::iter(sampled)
            .map(|url| async move {
                match self.get_html(&url).await {
                    Ok(Some(html)) => extract_article(&url, &html),
                    Ok(None) => None,
                    Err(e) => {
                        warn!("Failed to fetch {}: {}", url, e);
                        None
                    }
                }
            })
            .buffered(10)
            .collect()
            .await;

        Ok(articles.into_iter().flatten().take(limit).collect())
    }
}

#[async_trait]
impl ArticleSource for WebSource {
    async fn fetch(&self, max_count: usize) -> Result<Vec<ArticleCandidate>, FetchError> {
        if self.sites.is_empty() || max_count == 0 {
            return Ok(Vec::new());
        }

        let per_site = max_count.div_ceil(self.sites.len());
        let mut all = Vec::new();

        for site in &self.sites {
            info!("Discovering articles from {}", site);
            match self.fetch_site(site, per_site).await {
                Ok(articles) => {
                    info!("Found {} articles from {}", articles.len(), site);
                    all.extend(articles);
                }
                Err(e) => warn!("Skipping source {}: {}", site, e),
            }
        }

        all.truncate(max_count);
        Ok(all)
    }
}

/// Same-site links whose path looks like an article slug, in page order, deduplicated.
pub fn discover_links(site: &str, html: &str) -> Result<Vec<String>, FetchError> {
    let base = Url::parse(site).map_err(|e| FetchError::Parse(format!("{}: {}", site, e)))?;
    let site_domain = extract_domain(site);
    let selector = Selector::parse("a[href]").map_err(|e| FetchError::Parse(e.to_string()))?;
    let document = Html::parse_document(html);

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(mut url) = base.join(href) else {
            continue;
        };
        url.set_fragment(None);

        if !matches!(url.scheme(), "http" | "https") {
            continue;
        }
        if extract_domain(url.as_str()) != site_domain {
            continue;
        }
        if !looks_like_article(&url) {
            continue;
        }

        let link = url.to_string();
        if seen.insert(link.clone()) {
            links.push(link);
        }
    }

    Ok(links)
}

fn looks_like_article(url: &Url) -> bool {
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    let has_slug = segments
        .last()
        .map(|last| last.matches('-').count() >= 2)
        .unwrap_or(false);
    let has_year = segments
        .iter()
        .any(|seg| seg.len() == 4 && seg.starts_with("20") && seg.chars().all(|c| c.is_ascii_digit()));

    has_slug || (has_year && segments.len() >= 3)
}

/// Title, publish date and readable text of an article page. `None` when there is no title
/// or too little text to be an article.
pub fn extract_article(url: &str, html: &str) -> Option<ArticleCandidate> {
    let document = Html::parse_document(html);

    let title = meta_content(&document, r#"meta[property="og:title"]"#)
        .or_else(|| first_text(&document, "h1"))
        .or_else(|| first_text(&document, "title"))?;

    let published = meta_content(&document, r#"meta[property="article:published_time"]"#)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let body_html = first_html(&document, "article").or_else(|| first_html(&document, "body"))?;
    let text = html2text::from_read(body_html.as_bytes(), 100);
    let text = text.trim();
    if text.len() < MIN_TEXT_LEN {
        return None;
    }

    let source = extract_domain(url).unwrap_or_else(|| url.to_string());
    let snippet: String = text.chars().take(SNIPPET_CHARS).collect();

    let mut candidate = ArticleCandidate::new(title, source)
        .with_url(url)
        .with_snippet(snippet)
        .with_full_text(text);
    candidate.published = published;
    Some(candidate)
}

fn meta_content(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("content"))
        .map(|c| c.trim().to_string())
        .find(|c| !c.is_empty())
}

fn first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .map(|el| el.text().collect::<Vec<_>>().join(" "))
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .find(|t| !t.is_empty())
}

fn first_html(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document.select(&selector).next().map(|el| el.html())
}

/// Candidates saved as a JSON array, for offline or replayed runs.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ArticleSource for JsonFileSource {
    async fn fetch(&self, max_count: usize) -> Result<Vec<ArticleCandidate>, FetchError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let mut candidates: Vec<ArticleCandidate> = serde_json::from_str(&content)?;
        candidates.truncate(max_count);
        Ok(candidates)
    }
}
