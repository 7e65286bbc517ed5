//! Primary search source: Google Scholar over plain HTTP.
//!
//! A query yields a lazy sequence of hits, fetched one result page at a time.
//! Each hit is resolved to its citation blob (BibTeX) by a separate fill call
//! that walks Scholar's cite dialog. Both calls report CAPTCHA pages as
//! [`LitscoutError::BotDetected`].

use crate::config::SearchConfig;
use crate::cookies::CookieStore;
use crate::error::{LitscoutError, Result};
use crate::identity::{Identity, IdentityRotator};
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Results per Scholar page.
const PAGE_SIZE: usize = 10;

/// Scholar stops serving results past this offset.
const MAX_START: usize = 990;

/// Elements that only appear on Scholar's challenge page.
const CAPTCHA_SELECTORS: &[&str] = &["#gs_captcha_ccl", "#gs_captcha_f", "form#captcha-form", "div.g-recaptcha"];

/// Sentences from the challenge page body.
const CAPTCHA_SENTENCES: &[&str] = &[
    "Our systems have detected unusual traffic from your computer network",
    "Solving the above CAPTCHA",
    "www.google.com/recaptcha/api",
];

/// One search hit, as listed on a result page.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ScholarHit {
    pub title: String,
    /// Author line, comma separated
    pub author: String,
    pub year: String,
    pub venue: String,
    pub article_url: String,
    pub citations: u64,
    pub snippet: String,
    /// Scholar cluster id (`data-cid`), needed to fetch the citation
    pub cluster_id: String,
}

impl ScholarHit {
    /// Author line split into names.
    pub fn author_list(&self) -> Vec<String> {
        self.author
            .split(',')
            .map(|a| a.trim().trim_end_matches('…').trim().to_string())
            .filter(|a| !a.is_empty())
            .collect()
    }
}

/// A hit resolved to its detail fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilledHit {
    pub hit: ScholarHit,
    /// Native citation blob (BibTeX), possibly empty
    pub bibtex: String,
}

/// Lazy sequence of hits for one query.
#[async_trait]
pub trait HitStream: Send {
    /// Next hit, or `None` once the source has nothing more.
    async fn next_hit(&mut self) -> Result<Option<ScholarHit>>;
}

/// The primary search source.
#[async_trait]
pub trait ScholarSource: Send + Sync {
    /// Start a query. Fails if the first result page cannot be fetched.
    async fn search(&self, query: &str) -> Result<Box<dyn HitStream>>;

    /// Resolve a hit to its detail fields.
    async fn fill(&self, hit: &ScholarHit) -> Result<FilledHit>;
}

/// Google Scholar HTTP client.
///
/// Every request is sent with the rotator's current identity, so rotating
/// between retries takes effect on the next call.
#[derive(Clone)]
pub struct ScholarClient {
    base_url: String,
    timeout: Duration,
    rotator: Arc<IdentityRotator>,
    cookies: CookieStore,
}

impl ScholarClient {
    pub fn new(config: &SearchConfig, rotator: Arc<IdentityRotator>, cookies: CookieStore) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.request_timeout_secs),
            rotator,
            cookies,
        }
    }

    /// Fetch one result page starting at offset `start`.
    async fn fetch_results(&self, query: &str, start: usize) -> Result<Vec<ScholarHit>> {
        let url = build_search_url(&self.base_url, query, start)?;
        debug!(start = start, url = %url, "Fetching result page");

        let html = self.fetch_page(&url).await?;
        let hits = parse_result_items(&html)?;
        info!(start = start, count = hits.len(), "Parsed results");
        Ok(hits)
    }

    /// Fetch page content with the current identity and session cookies.
    async fn fetch_page(&self, url: &Url) -> Result<String> {
        let identity = self.rotator.current();
        let client = build_http_client(&identity, self.timeout)?;

        let mut request = client
            .get(url.as_str())
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Cache-Control", "no-cache")
            .header("Upgrade-Insecure-Requests", "1");

        let cookie_header = self.cookies.header_for("google");
        if !cookie_header.is_empty() {
            request = request.header("Cookie", cookie_header);
        }

        let response = request.send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LitscoutError::RateLimited(60));
        }

        let body = response.text().await?;
        check_bot_page(&body)?;

        if !status.is_success() {
            return Err(LitscoutError::Api {
                code: i32::from(status.as_u16()),
                message: format!("HTTP error: {}", status),
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl ScholarSource for ScholarClient {
    async fn search(&self, query: &str) -> Result<Box<dyn HitStream>> {
        info!(query = query, url = %self.base_url, "Starting Scholar query");
        let first_page = self.fetch_results(query, 0).await?;

        Ok(Box::new(ScholarPager {
            client: self.clone(),
            query: query.to_string(),
            exhausted: first_page.len() < PAGE_SIZE,
            buffer: first_page.into(),
            next_start: PAGE_SIZE,
        }))
    }

    async fn fill(&self, hit: &ScholarHit) -> Result<FilledHit> {
        if hit.cluster_id.is_empty() {
            return Err(LitscoutError::Parse(format!(
                "Hit '{}' has no citation id",
                hit.title
            )));
        }

        let cite_url = build_cite_url(&self.base_url, &hit.cluster_id)?;
        let cite_html = self.fetch_page(&cite_url).await?;

        let bibtex = match parse_bibtex_link(&cite_html, &cite_url)? {
            Some(link) => {
                debug!(cluster = %hit.cluster_id, link = %link, "Fetching BibTeX");
                self.fetch_page(&link).await?.trim().to_string()
            }
            None => {
                warn!(cluster = %hit.cluster_id, "Cite dialog has no BibTeX link");
                String::new()
            }
        };

        Ok(FilledHit {
            hit: hit.clone(),
            bibtex,
        })
    }
}

/// Pages through Scholar results on demand.
struct ScholarPager {
    client: ScholarClient,
    query: String,
    buffer: VecDeque<ScholarHit>,
    next_start: usize,
    exhausted: bool,
}

#[async_trait]
impl HitStream for ScholarPager {
    async fn next_hit(&mut self) -> Result<Option<ScholarHit>> {
        if self.buffer.is_empty() && !self.exhausted {
            if self.next_start > MAX_START {
                self.exhausted = true;
            } else {
                let page = self.client.fetch_results(&self.query, self.next_start).await?;
                self.next_start += PAGE_SIZE;
                self.exhausted = page.len() < PAGE_SIZE;
                self.buffer.extend(page);
            }
        }
        Ok(self.buffer.pop_front())
    }
}

/// Build an HTTP client for the given identity.
pub(crate) fn build_http_client(identity: &Identity, timeout: Duration) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(identity.user_agent.as_str())
        .timeout(timeout)
        .cookie_store(true);

    if let Some(proxy_url) = identity.proxy.as_deref() {
        let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
            LitscoutError::Config(format!("Invalid proxy URL '{}': {}", proxy_url, e))
        })?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| LitscoutError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// Fail with [`LitscoutError::BotDetected`] if `html` is a CAPTCHA page.
///
/// A page that lists results is never a challenge, whatever its titles and
/// snippets say.
pub fn check_bot_page(html: &str) -> Result<()> {
    let document = Html::parse_document(html);
    let item_selector =
        Selector::parse("div.gs_r").map_err(|e| LitscoutError::Parse(e.to_string()))?;
    if document.select(&item_selector).next().is_some() {
        return Ok(());
    }

    let challenge_element = CAPTCHA_SELECTORS
        .iter()
        .filter_map(|raw| Selector::parse(raw).ok())
        .any(|selector| document.select(&selector).next().is_some());
    if challenge_element || CAPTCHA_SENTENCES.iter().any(|m| html.contains(m)) {
        warn!("CAPTCHA detected");
        return Err(LitscoutError::BotDetected);
    }
    Ok(())
}

/// Build Google Scholar search URL
fn build_search_url(base_url: &str, query: &str, start: usize) -> Result<Url> {
    let mut url = Url::parse(&format!("{}/scholar", base_url))
        .map_err(|e| LitscoutError::Config(format!("Invalid base URL: {}", e)))?;

    url.query_pairs_mut()
        .append_pair("q", query)
        .append_pair("hl", "en")
        .append_pair("start", &start.to_string())
        .append_pair("as_sdt", "0,5");

    Ok(url)
}

/// Build the cite dialog URL for a cluster id.
fn build_cite_url(base_url: &str, cluster_id: &str) -> Result<Url> {
    let mut url = Url::parse(&format!("{}/scholar", base_url))
        .map_err(|e| LitscoutError::Config(format!("Invalid base URL: {}", e)))?;

    url.query_pairs_mut()
        .append_pair("q", &format!("info:{}:scholar.google.com/", cluster_id))
        .append_pair("output", "cite")
        .append_pair("scirp", "0")
        .append_pair("hl", "en");

    Ok(url)
}

/// Find the BibTeX export link in the cite dialog.
pub fn parse_bibtex_link(html: &str, page_url: &Url) -> Result<Option<Url>> {
    let document = Html::parse_document(html);
    let link_selector =
        Selector::parse("a.gs_citi").map_err(|e| LitscoutError::Parse(e.to_string()))?;

    let href = document
        .select(&link_selector)
        .find(|a| a.text().collect::<String>().trim().eq_ignore_ascii_case("bibtex"))
        .and_then(|a| a.value().attr("href"));

    match href {
        Some(href) => page_url
            .join(href)
            .map(Some)
            .map_err(|e| LitscoutError::Parse(format!("Bad BibTeX link '{}': {}", href, e))),
        None => Ok(None),
    }
}

/// Parse a Scholar result page into hits.
pub fn parse_result_items(html: &str) -> Result<Vec<ScholarHit>> {
    let document = Html::parse_document(html);

    let item_selector =
        Selector::parse("div.gs_r.gs_or.gs_scl").map_err(|e| LitscoutError::Parse(e.to_string()))?;
    let title_selector =
        Selector::parse("h3.gs_rt").map_err(|e| LitscoutError::Parse(e.to_string()))?;
    let link_selector =
        Selector::parse("h3.gs_rt a").map_err(|e| LitscoutError::Parse(e.to_string()))?;
    let meta_selector =
        Selector::parse("div.gs_a").map_err(|e| LitscoutError::Parse(e.to_string()))?;
    let snippet_selector =
        Selector::parse("div.gs_rs").map_err(|e| LitscoutError::Parse(e.to_string()))?;
    let cite_selector =
        Selector::parse("div.gs_fl a").map_err(|e| LitscoutError::Parse(e.to_string()))?;

    let year_regex =
        Regex::new(r"\b(19|20)\d{2}\b").map_err(|e| LitscoutError::Parse(e.to_string()))?;
    let cite_regex =
        Regex::new(r"Cited by\s*(\d+)").map_err(|e| LitscoutError::Parse(e.to_string()))?;

    let mut results = Vec::new();

    for item in document.select(&item_selector) {
        let mut hit = ScholarHit {
            cluster_id: item.value().attr("data-cid").unwrap_or_default().to_string(),
            ..Default::default()
        };

        if let Some(title_elem) = item.select(&title_selector).next() {
            if let Some(link) = item.select(&link_selector).next() {
                hit.title = normalize_ws(&link.text().collect::<String>());
                hit.article_url = link.value().attr("href").unwrap_or_default().to_string();
            } else {
                // [CITATION] / [BOOK] entries carry no link
                hit.title = normalize_ws(&title_elem.text().collect::<String>());
            }
        }

        // "A Author, B Author - Venue, 2020 - publisher"
        if let Some(meta_elem) = item.select(&meta_selector).next() {
            let meta_text = meta_elem.text().collect::<String>();
            let parts: Vec<&str> = meta_text.split(" - ").collect();

            if let Some(authors) = parts.first() {
                hit.author = authors.trim().to_string();
            }

            if let Some(venue_year) = parts.get(1) {
                if let Some(year_match) = year_regex.find(venue_year) {
                    hit.year = year_match.as_str().to_string();
                    hit.venue = venue_year[..year_match.start()]
                        .trim()
                        .trim_end_matches(',')
                        .to_string();
                } else {
                    hit.venue = venue_year.trim().to_string();
                }
            }
        }

        if let Some(snippet_elem) = item.select(&snippet_selector).next() {
            hit.snippet = normalize_ws(&snippet_elem.text().collect::<String>());
        }

        for link in item.select(&cite_selector) {
            let href = link.value().attr("href").unwrap_or_default();
            if !href.contains("cites=") {
                continue;
            }
            let text = link.text().collect::<String>();
            if let Some(count) = cite_regex.captures(&text).and_then(|c| c.get(1)) {
                hit.citations = count.as_str().parse().unwrap_or(0);
                break;
            }
        }

        if !hit.title.is_empty() {
            results.push(hit);
        }
    }

    Ok(results)
}

fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
