//! Abstract backfill from a record's landing page.
//!
//! arXiv URLs are answered from the metadata source directly. Other pages
//! are fetched and checked against a fixed list of selectors; if none matches,
//! the start of the page's visible text goes to the response generator.

use crate::arxiv::{find_arxiv_id, MetadataSource};
use crate::error::{LitscoutError, Result};
use crate::identity::Identity;
use crate::llm::ResponseGenerator;
use crate::prompts::{build_page_abstract_prompt, PAGE_TEXT_LIMIT};
use crate::retry::RetryPolicy;
use crate::scholar::build_http_client;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where abstracts usually live, most specific first.
const ABSTRACT_SELECTORS: &[&str] = &[
    "div.abstract",
    "div#abstract",
    "section.abstract",
    "p.abstract",
    "[role=\"doc-abstract\"]",
    "meta[name=\"description\"]",
    "meta[property=\"og:description\"]",
];

/// Elements whose text is not shown to readers.
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "head", "title", "template"];

/// Fetches a page as a given identity.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, identity: &Identity) -> Result<String>;
}

/// Plain HTTP page fetcher.
#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    timeout: Duration,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str, identity: &Identity) -> Result<String> {
        let client = build_http_client(identity, self.timeout)?;
        let response = client
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml")
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LitscoutError::RateLimited(60));
        }
        if !status.is_success() {
            return Err(LitscoutError::Api {
                code: i32::from(status.as_u16()),
                message: format!("HTTP error fetching {}: {}", url, status),
            });
        }
        Ok(response.text().await?)
    }
}

/// What a fetched page offered.
#[derive(Debug, PartialEq)]
enum PageContent {
    /// A selector matched
    Abstract(String),
    /// No selector matched; visible text prefix for the model
    Text(String),
}

/// Backfills missing abstracts.
pub struct AbstractBackfill {
    fetcher: Arc<dyn PageFetcher>,
    metadata: Arc<dyn MetadataSource>,
    generator: Arc<dyn ResponseGenerator>,
    retry: RetryPolicy,
}

impl AbstractBackfill {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        metadata: Arc<dyn MetadataSource>,
        generator: Arc<dyn ResponseGenerator>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            fetcher,
            metadata,
            generator,
            retry,
        }
    }

    /// Find an abstract for `url`. Returns an empty string when none could be
    /// found after all attempts.
    pub async fn backfill(&self, url: &str) -> String {
        if url.trim().is_empty() {
            return String::new();
        }

        let result = self
            .retry
            .run(
                "abstract_backfill",
                |attempt| async move {
                    let identity = Identity::fresh();
                    debug!(url = url, attempt = attempt + 1, "Backfilling abstract");
                    self.attempt(url, &identity).await
                },
                |_| true,
                |_| {},
            )
            .await;

        match result {
            Ok(text) => {
                if !text.is_empty() {
                    info!(url = url, chars = text.len(), "Abstract backfilled");
                }
                text
            }
            Err(e) => {
                let attempts = e.attempts();
                warn!(url = url, attempts, error = %e.into_inner(), "Abstract backfill gave up");
                String::new()
            }
        }
    }

    async fn attempt(&self, url: &str, identity: &Identity) -> Result<String> {
        if let Some(arxiv_id) = find_arxiv_id(url) {
            let record = self.metadata.lookup(&arxiv_id).await?;
            return Ok(record.map(|r| r.abstract_text).unwrap_or_default());
        }

        let html = self.fetcher.fetch(url, identity).await?;
        let text = match inspect_page(&html) {
            PageContent::Abstract(found) => return Ok(found),
            PageContent::Text(text) => text,
        };
        if text.is_empty() {
            return Ok(String::new());
        }

        match self.generator.generate(&build_page_abstract_prompt(&text)).await {
            Ok(answer) => Ok(answer.trim().to_string()),
            Err(e) => {
                warn!(url = url, error = %e, "Model abstract extraction failed");
                Ok(String::new())
            }
        }
    }
}

/// Look for an abstract on the page, else return the visible text prefix.
fn inspect_page(html: &str) -> PageContent {
    let document = Html::parse_document(html);

    for raw in ABSTRACT_SELECTORS {
        let Ok(selector) = Selector::parse(raw) else {
            continue;
        };
        let found = document
            .select(&selector)
            .map(|el| element_content(&el))
            .find(|text| !text.is_empty());
        if let Some(text) = found {
            debug!(selector = raw, "Abstract selector matched");
            return PageContent::Abstract(text);
        }
    }

    PageContent::Text(visible_text(&document).chars().take(PAGE_TEXT_LIMIT).collect())
}

/// `content` attribute for meta tags, text otherwise.
fn element_content(el: &ElementRef) -> String {
    let text = match el.value().attr("content") {
        Some(content) => content.to_string(),
        None => el.text().collect::<String>(),
    };
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn visible_text(document: &Html) -> String {
    let mut words: Vec<&str> = Vec::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .ancestors()
            .filter_map(|a| a.value().as_element())
            .any(|el| HIDDEN_ELEMENTS.contains(&el.name()));
        if !hidden {
            words.extend(text.split_whitespace());
        }
    }
    words.join(" ")
}

/// Fetcher with canned behaviour that counts calls.
#[cfg(test)]
pub struct FakeFetcher {
    reply: Box<dyn Fn(&str) -> Result<String> + Send + Sync>,
    calls: std::sync::atomic::AtomicU32,
}

#[cfg(test)]
impl FakeFetcher {
    pub fn new(reply: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            reply: Box::new(reply),
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub fn serving(html: &str) -> Self {
        let html = html.to_string();
        Self::new(move |_| Ok(html.clone()))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str, _identity: &Identity) -> Result<String> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        (self.reply)(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arxiv::{ArxivRecord, FakeMetadataSource};
    use crate::error::GenerationError;
    use crate::llm::FakeGenerator;
    use crate::retry::RecordingSleeper;

    struct Harness {
        fetcher: Arc<FakeFetcher>,
        generator: Arc<FakeGenerator>,
        sleeper: Arc<RecordingSleeper>,
        backfill: AbstractBackfill,
    }

    fn harness(fetcher: FakeFetcher, generator: FakeGenerator, metadata: FakeMetadataSource) -> Harness {
        let fetcher = Arc::new(fetcher);
        let generator = Arc::new(generator);
        let sleeper = Arc::new(RecordingSleeper::default());
        let backfill = AbstractBackfill::new(
            fetcher.clone(),
            Arc::new(metadata),
            generator.clone(),
            RetryPolicy::default().with_sleeper(sleeper.clone()),
        );
        Harness {
            fetcher,
            generator,
            sleeper,
            backfill,
        }
    }

    #[tokio::test]
    async fn test_abstract_div_without_model() {
        let h = harness(
            FakeFetcher::serving(r#"<html><body><div class="abstract">Sample text</div></body></html>"#),
            FakeGenerator::replying("should not be used"),
            FakeMetadataSource::default(),
        );

        let text = h.backfill.backfill("https://example.org/paper/42").await;
        assert_eq!(text, "Sample text");
        assert_eq!(h.generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_meta_description_content() {
        let h = harness(
            FakeFetcher::serving(
                r#"<html><head><meta name="description" content="  Described   here. "></head><body><p>Body</p></body></html>"#,
            ),
            FakeGenerator::replying("unused"),
            FakeMetadataSource::default(),
        );
        assert_eq!(h.backfill.backfill("https://example.org/p").await, "Described here.");
    }

    #[tokio::test]
    async fn test_model_fallback_sees_visible_text_only() {
        let h = harness(
            FakeFetcher::serving(
                "<html><head><title>Ignored</title><script>var x = 1;</script></head>\
                 <body><h1>Paper</h1><p>We study retrieval.</p></body></html>",
            ),
            FakeGenerator::replying("  We study retrieval.  "),
            FakeMetadataSource::default(),
        );

        assert_eq!(h.backfill.backfill("https://example.org/p").await, "We study retrieval.");
        let prompts = h.generator.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Paper We study retrieval."));
        assert!(!prompts[0].contains("var x"));
        assert!(!prompts[0].contains("Ignored"));
    }

    #[tokio::test]
    async fn test_arxiv_url_short_circuits() {
        let record = ArxivRecord {
            abstract_text: "From arXiv.".to_string(),
            ..Default::default()
        };
        let h = harness(
            FakeFetcher::serving("<div class=\"abstract\">page</div>"),
            FakeGenerator::replying("unused"),
            FakeMetadataSource::with("2312.10997", record),
        );

        assert_eq!(h.backfill.backfill("https://arxiv.org/pdf/2312.10997").await, "From arXiv.");
        assert_eq!(h.fetcher.calls(), 0);
        assert_eq!(h.generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_failures_exhaust_to_empty() {
        let h = harness(
            FakeFetcher::new(|_| Err(LitscoutError::RateLimited(60))),
            FakeGenerator::replying("unused"),
            FakeMetadataSource::default(),
        );

        assert_eq!(h.backfill.backfill("https://example.org/p").await, "");
        assert_eq!(h.fetcher.calls(), 3);
        assert_eq!(
            h.sleeper.delays(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn test_generation_error_is_not_retried() {
        let h = harness(
            FakeFetcher::serving("<html><body><p>No abstract here.</p></body></html>"),
            FakeGenerator::failing(GenerationError::Transport("timeout".to_string())),
            FakeMetadataSource::default(),
        );

        assert_eq!(h.backfill.backfill("https://example.org/p").await, "");
        assert_eq!(h.fetcher.calls(), 1);
        assert!(h.sleeper.delays().is_empty());
    }

    #[test]
    fn test_selector_order() {
        let html = r#"<html><head><meta name="description" content="meta"></head>
            <body><section class="abstract">section</section></body></html>"#;
        assert_eq!(inspect_page(html), PageContent::Abstract("section".to_string()));
    }
}
