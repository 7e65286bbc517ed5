//! arXiv as the secondary metadata source.
//!
//! Identifiers are spotted in URLs and citation text, then looked up via the
//! arXiv export API, which answers with an Atom feed.

use crate::error::{LitscoutError, Result};
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

/// arXiv export API base URL
pub const ARXIV_API_URL: &str = "https://export.arxiv.org";

fn id_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"arxiv\.org/abs/(\d+\.\d+)",
            r"arxiv\.org/pdf/(\d+\.\d+)",
            r"(?i)arxiv:(\d+\.\d+)",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// First arXiv identifier in `text`, trying the abs-path, pdf-path and
/// `arXiv:ID` patterns in that order.
pub fn find_arxiv_id(text: &str) -> Option<String> {
    id_patterns().iter().find_map(|re| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    })
}

/// Canonical metadata for one arXiv paper.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ArxivRecord {
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub authors: Vec<String>,
    /// Canonical abs URL
    pub url: String,
    /// YYYY-MM-DD
    pub published: String,
    pub doi: Option<String>,
    pub categories: Vec<String>,
}

/// Lookup by cross-reference identifier.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// `Ok(None)` when the identifier is unknown.
    async fn lookup(&self, arxiv_id: &str) -> Result<Option<ArxivRecord>>;
}

/// HTTP client for the arXiv export API.
#[derive(Debug, Clone)]
pub struct ArxivClient {
    client: reqwest::Client,
    base_url: String,
}

impl ArxivClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_base_url(ARXIV_API_URL, timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LitscoutError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MetadataSource for ArxivClient {
    async fn lookup(&self, arxiv_id: &str) -> Result<Option<ArxivRecord>> {
        let url = format!(
            "{}/api/query?id_list={}&max_results=1",
            self.base_url,
            urlencoding::encode(arxiv_id)
        );
        debug!(id = arxiv_id, "Querying arXiv");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(LitscoutError::Api {
                code: response.status().as_u16() as i32,
                message: format!("arXiv API error for {}", arxiv_id),
            });
        }

        let body = response.text().await?;
        let record = parse_feed(&body)?.into_iter().next();
        match &record {
            Some(r) => info!(id = arxiv_id, title = %r.title, "arXiv metadata found"),
            None => debug!(id = arxiv_id, "arXiv identifier not found"),
        }
        Ok(record)
    }
}

#[derive(PartialEq)]
enum Field {
    None,
    Id,
    Title,
    Summary,
    Published,
    AuthorName,
    Doi,
}

/// Parse an arXiv Atom feed.
///
/// Error entries (the API reports bad identifiers as an entry whose id points
/// at `/api/errors`) are skipped.
pub fn parse_feed(xml: &str) -> Result<Vec<ArxivRecord>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut buf = Vec::new();
    let mut in_entry = false;
    let mut id = String::new();
    let mut current = ArxivRecord::default();
    let mut field = Field::None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"entry" => {
                    in_entry = true;
                    id.clear();
                    current = ArxivRecord::default();
                }
                b"id" if in_entry => field = Field::Id,
                b"title" if in_entry => field = Field::Title,
                b"summary" if in_entry => field = Field::Summary,
                b"published" if in_entry => field = Field::Published,
                b"name" if in_entry => field = Field::AuthorName,
                b"arxiv:doi" if in_entry => field = Field::Doi,
                _ => field = Field::None,
            },
            Ok(Event::Empty(e)) if in_entry && e.name().as_ref() == b"category" => {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"term" {
                        let term = String::from_utf8_lossy(&attr.value).to_string();
                        if !term.is_empty() && !current.categories.contains(&term) {
                            current.categories.push(term);
                        }
                    }
                }
            }
            Ok(Event::Text(e)) if in_entry => {
                let text = e
                    .unescape()
                    .map(|t| t.into_owned())
                    .map_err(|e| LitscoutError::Parse(format!("arXiv feed: {}", e)))?;
                match field {
                    Field::Id => id.push_str(&text),
                    Field::Title => current.title.push_str(&text),
                    Field::Summary => current.abstract_text.push_str(&text),
                    Field::Published => current.published.push_str(&text),
                    Field::AuthorName => current.authors.push(text.trim().to_string()),
                    Field::Doi => current.doi = Some(text.trim().to_string()),
                    Field::None => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"entry" {
                    in_entry = false;
                    if id.contains("/api/errors") || id.trim().is_empty() {
                        warn!(id = %id, "Skipping arXiv error entry");
                    } else {
                        let mut record = std::mem::take(&mut current);
                        record.title = collapse_ws(&record.title);
                        record.abstract_text = collapse_ws(&record.abstract_text);
                        record.published = record.published.chars().take(10).collect();
                        record.url = canonical_url(id.trim());
                        records.push(record);
                    }
                }
                field = Field::None;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(LitscoutError::Parse(format!(
                    "arXiv feed error at position {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(records)
}

/// `http://arxiv.org/abs/2312.10997v5` -> `https://arxiv.org/abs/2312.10997v5`
fn canonical_url(entry_id: &str) -> String {
    match entry_id.strip_prefix("http://") {
        Some(rest) => format!("https://{}", rest),
        None => entry_id.to_string(),
    }
}

fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Metadata source backed by a fixed map; unknown ids are "not found".
#[cfg(test)]
#[derive(Default)]
pub struct FakeMetadataSource {
    pub records: std::collections::HashMap<String, ArxivRecord>,
    pub fail: bool,
    pub lookups: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl FakeMetadataSource {
    pub fn with(id: &str, record: ArxivRecord) -> Self {
        let mut source = Self::default();
        source.records.insert(id.to_string(), record);
        source
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
#[async_trait]
impl MetadataSource for FakeMetadataSource {
    async fn lookup(&self, arxiv_id: &str) -> Result<Option<ArxivRecord>> {
        if let Ok(mut lookups) = self.lookups.lock() {
            lookups.push(arxiv_id.to_string());
        }
        if self.fail {
            return Err(LitscoutError::Api {
                code: 503,
                message: "arXiv unavailable".to_string(),
            });
        }
        Ok(self.records.get(arxiv_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title type="html">ArXiv Query: id_list=2312.10997</title>
  <entry>
    <id>http://arxiv.org/abs/2312.10997v5</id>
    <published>2023-12-18T07:47:33Z</published>
    <title>Retrieval-Augmented Generation for Large
      Language Models: A Survey</title>
    <summary>  Large Language Models (LLMs) showcase impressive capabilities
      but encounter challenges &amp; limits.
    </summary>
    <author><name>Yunfan Gao</name></author>
    <author><name>Yun Xiong</name></author>
    <arxiv:doi>10.48550/arXiv.2312.10997</arxiv:doi>
    <link href="http://arxiv.org/abs/2312.10997v5" rel="alternate" type="text/html"/>
    <arxiv:primary_category term="cs.CL" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.CL" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.AI" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
</feed>"#;

    const ERROR_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/api/errors#incorrect_id_format_for_9999.0</id>
    <title>Error</title>
    <summary>incorrect id format for 9999.0</summary>
  </entry>
</feed>"#;

    #[test]
    fn test_find_arxiv_id_patterns() {
        assert_eq!(
            find_arxiv_id("https://arxiv.org/abs/1234.56789").as_deref(),
            Some("1234.56789")
        );
        assert_eq!(
            find_arxiv_id("https://arxiv.org/pdf/2312.10997v2.pdf").as_deref(),
            Some("2312.10997")
        );
        assert_eq!(
            find_arxiv_id("journal={arXiv preprint arXiv:2501.09136}").as_deref(),
            Some("2501.09136")
        );
        assert_eq!(find_arxiv_id("https://doi.org/10.1145/1234.5678"), None);
    }

    #[test]
    fn test_abs_path_wins_over_token() {
        let text = "arXiv:1111.22222 see https://arxiv.org/abs/3333.44444";
        assert_eq!(find_arxiv_id(text).as_deref(), Some("3333.44444"));
    }

    #[test]
    fn test_parse_feed() -> Result<()> {
        let records = parse_feed(FEED)?;
        assert_eq!(records.len(), 1);

        let r = &records[0];
        assert_eq!(
            r.title,
            "Retrieval-Augmented Generation for Large Language Models: A Survey"
        );
        assert_eq!(
            r.abstract_text,
            "Large Language Models (LLMs) showcase impressive capabilities but encounter challenges & limits."
        );
        assert_eq!(r.authors, vec!["Yunfan Gao", "Yun Xiong"]);
        assert_eq!(r.url, "https://arxiv.org/abs/2312.10997v5");
        assert_eq!(r.published, "2023-12-18");
        assert_eq!(r.doi.as_deref(), Some("10.48550/arXiv.2312.10997"));
        assert_eq!(r.categories, vec!["cs.CL", "cs.AI"]);
        Ok(())
    }

    #[test]
    fn test_parse_error_feed() -> Result<()> {
        assert!(parse_feed(ERROR_FEED)?.is_empty());
        assert!(parse_feed("<feed></feed>")?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_client_lookup() -> Result<()> {
        use axum::{routing::get, Router};

        let router = Router::new().route("/api/query", get(|| async { FEED }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}", listener.local_addr()?);
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        let client = ArxivClient::with_base_url(&url, Duration::from_secs(5))?;
        let record = client.lookup("2312.10997").await?.expect("record");
        assert_eq!(record.authors.len(), 2);
        Ok(())
    }
}
