//! Zotero persistence.
//!
//! [`ZoteroClient`] speaks the Zotero Web API v3; [`ZoteroAgent`] decides
//! what gets saved and with which tags, and reports per-article outcomes
//! instead of failing the batch.

use crate::config::ZoteroConfig;
use crate::error::{LitscoutError, Result};
use crate::processing::ProcessedArticle;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Zotero Web API base URL
pub const ZOTERO_API_URL: &str = "https://api.zotero.org";

/// Abstract stored when a record has none.
pub const DEFAULT_ABSTRACT: &str = "No abstract available";

/// Analysis keywords added as tags per article.
const MAX_KEYWORD_TAGS: usize = 5;

/// A `journalArticle` to create.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewItem {
    pub title: String,
    pub abstract_note: String,
    pub url: String,
    pub tags: Vec<String>,
    pub authors: Vec<String>,
    pub date: String,
    pub doi: String,
    pub publication: String,
    /// Collection keys to file the item under
    pub collections: Vec<String>,
}

impl NewItem {
    /// Zotero item JSON.
    fn to_json(&self) -> Value {
        let creators: Vec<Value> = self
            .authors
            .iter()
            .map(|name| json!({ "creatorType": "author", "name": name }))
            .collect();
        let tags: Vec<Value> = self.tags.iter().map(|tag| json!({ "tag": tag })).collect();

        json!({
            "itemType": "journalArticle",
            "title": self.title,
            "abstractNote": self.abstract_note,
            "url": self.url,
            "creators": creators,
            "date": self.date,
            "DOI": self.doi,
            "publicationTitle": self.publication,
            "tags": tags,
            "collections": self.collections,
        })
    }
}

/// A collection in the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub key: String,
    pub name: String,
}

/// An item already stored in the library.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SavedItem {
    pub key: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub url: String,
    pub tags: Vec<String>,
}

/// The reference store.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    /// Create one item and return its key.
    async fn create_item(&self, item: &NewItem) -> Result<String>;

    async fn collections(&self) -> Result<Vec<Collection>>;

    async fn collection_items(&self, collection_key: &str) -> Result<Vec<SavedItem>>;

    /// Free-text search over the library.
    async fn search_items(&self, query: &str) -> Result<Vec<SavedItem>>;
}

#[derive(Debug, Deserialize)]
struct ItemEnvelope {
    key: String,
    #[serde(default)]
    data: ItemData,
}

#[derive(Debug, Default, Deserialize)]
struct ItemData {
    #[serde(default)]
    title: String,
    #[serde(default, rename = "abstractNote")]
    abstract_note: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    tags: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    tag: String,
}

impl From<ItemEnvelope> for SavedItem {
    fn from(item: ItemEnvelope) -> Self {
        Self {
            key: item.key,
            title: item.data.title,
            abstract_text: item.data.abstract_note,
            url: item.data.url,
            tags: item.data.tags.into_iter().map(|t| t.tag).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CollectionEnvelope {
    key: String,
    data: CollectionData,
}

#[derive(Debug, Deserialize)]
struct CollectionData {
    name: String,
}

/// Zotero Web API v3 client.
#[derive(Debug, Clone)]
pub struct ZoteroClient {
    client: reqwest::Client,
    library_url: String,
    api_key: String,
}

impl ZoteroClient {
    pub fn new(config: &ZoteroConfig) -> Result<Self> {
        Self::with_base_url(config, ZOTERO_API_URL)
    }

    pub fn with_base_url(config: &ZoteroConfig, base_url: &str) -> Result<Self> {
        if config.library_id.trim().is_empty() {
            return Err(LitscoutError::Config(
                "zotero.library_id is not set".to_string(),
            ));
        }
        let scope = match config.library_type.as_str() {
            "group" => "groups",
            _ => "users",
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| LitscoutError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            library_url: format!(
                "{}/{}/{}",
                base_url.trim_end_matches('/'),
                scope,
                config.library_id.trim()
            ),
            api_key: config.api_key.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.library_url, path))
            .header("Zotero-API-Version", "3")
            .header("Zotero-API-Key", &self.api_key)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(60);
            return Err(LitscoutError::RateLimited(retry_after));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LitscoutError::Api {
                code: i32::from(status.as_u16()),
                message: format!("Zotero API error: {}", message.trim()),
            });
        }
        Ok(response)
    }

    async fn get_items(&self, path: &str, query: &[(&str, &str)]) -> Result<Vec<SavedItem>> {
        let request = self.request(reqwest::Method::GET, path).query(query);
        let items: Vec<ItemEnvelope> = self.send(request).await?.json().await?;
        Ok(items.into_iter().map(SavedItem::from).collect())
    }
}

#[async_trait]
impl ReferenceStore for ZoteroClient {
    async fn create_item(&self, item: &NewItem) -> Result<String> {
        let request = self
            .request(reqwest::Method::POST, "/items")
            .json(&vec![item.to_json()]);
        let body: Value = self.send(request).await?.json().await?;

        if let Some(failed) = body.pointer("/failed/0") {
            return Err(LitscoutError::Api {
                code: failed["code"].as_i64().unwrap_or(400) as i32,
                message: failed["message"].as_str().unwrap_or("item rejected").to_string(),
            });
        }

        body.pointer("/successful/0/key")
            .or_else(|| body.pointer("/success/0"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                LitscoutError::Parse("Zotero response has no created item key".to_string())
            })
    }

    async fn collections(&self) -> Result<Vec<Collection>> {
        let request = self.request(reqwest::Method::GET, "/collections");
        let collections: Vec<CollectionEnvelope> = self.send(request).await?.json().await?;
        Ok(collections
            .into_iter()
            .map(|c| Collection {
                key: c.key,
                name: c.data.name,
            })
            .collect())
    }

    async fn collection_items(&self, collection_key: &str) -> Result<Vec<SavedItem>> {
        self.get_items(&format!("/collections/{}/items/top", collection_key), &[])
            .await
    }

    async fn search_items(&self, query: &str) -> Result<Vec<SavedItem>> {
        self.get_items("/items/top", &[("q", query)]).await
    }
}

/// Result of saving one article.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SaveOutcome {
    pub article: ProcessedArticle,
    pub saved_to_zotero: bool,
    pub zotero_key: Option<String>,
    pub error: Option<String>,
}

/// Save policy on top of a [`ReferenceStore`].
pub struct ZoteroAgent {
    store: Arc<dyn ReferenceStore>,
    collection_name: String,
    auto_tags: Vec<String>,
    collection_key: OnceCell<Option<String>>,
}

impl ZoteroAgent {
    pub fn new(store: Arc<dyn ReferenceStore>, config: &ZoteroConfig) -> Self {
        Self {
            store,
            collection_name: config.collection_name.clone(),
            auto_tags: config.auto_tags.clone(),
            collection_key: OnceCell::new(),
        }
    }

    /// Key of the configured collection. A completed lookup is cached; a
    /// failed one is retried on the next save.
    async fn target_collection(&self) -> Option<String> {
        let lookup = self
            .collection_key
            .get_or_try_init(|| self.find_collection(&self.collection_name))
            .await;
        match lookup {
            Ok(key) => key.clone(),
            Err(e) => {
                warn!(collection = %self.collection_name, error = %e, "Collection lookup failed");
                None
            }
        }
    }

    async fn find_collection(&self, name: &str) -> Result<Option<String>> {
        let collections = self.store.collections().await?;
        Ok(collections.into_iter().find(|c| c.name == name).map(|c| c.key))
    }

    /// Tags for an article: auto tags, then up to five analysis keywords
    /// longer than three characters, without duplicates.
    pub fn tags_for(&self, article: &ProcessedArticle) -> Vec<String> {
        let keywords = article
            .analysis
            .iter()
            .flat_map(|a| a.keywords.iter())
            .map(|k| k.trim())
            .filter(|k| k.chars().count() > 3)
            .take(MAX_KEYWORD_TAGS);

        let mut tags: Vec<String> = Vec::new();
        for tag in self.auto_tags.iter().map(|t| t.trim()).chain(keywords) {
            if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
                tags.push(tag.to_string());
            }
        }
        tags
    }

    /// Save one article. Never fails; problems are reported in the outcome.
    pub async fn save_article(&self, article: ProcessedArticle) -> SaveOutcome {
        let record = &article.record;
        let title = record.title.trim().to_string();
        if title.is_empty() {
            return SaveOutcome {
                article,
                saved_to_zotero: false,
                zotero_key: None,
                error: Some("Missing title".to_string()),
            };
        }

        let abstract_note = match record.abstract_text.trim() {
            "" => DEFAULT_ABSTRACT.to_string(),
            text => text.to_string(),
        };

        let item = NewItem {
            title: title.clone(),
            abstract_note,
            url: record.url.trim().to_string(),
            tags: self.tags_for(&article),
            authors: record.authors.clone(),
            date: record.year.clone(),
            doi: record.doi.clone(),
            publication: record.venue.clone(),
            collections: self.target_collection().await.into_iter().collect(),
        };

        match self.store.create_item(&item).await {
            Ok(key) => {
                info!(title = %title, key = %key, "Saved to Zotero");
                SaveOutcome {
                    article,
                    saved_to_zotero: true,
                    zotero_key: Some(key),
                    error: None,
                }
            }
            Err(e) => {
                warn!(title = %title, error = %e, "Failed to save article");
                SaveOutcome {
                    article,
                    saved_to_zotero: false,
                    zotero_key: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Items in the named collection (the configured one by default).
    /// An unknown collection yields an empty list.
    pub async fn saved_items(&self, collection_name: Option<&str>) -> Result<Vec<SavedItem>> {
        let name = collection_name.unwrap_or(&self.collection_name);
        match self.find_collection(name).await? {
            Some(key) => self.store.collection_items(&key).await,
            None => {
                debug!(collection = name, "Collection not found");
                Ok(Vec::new())
            }
        }
    }

    pub async fn search_saved(&self, query: &str) -> Result<Vec<SavedItem>> {
        self.store.search_items(query).await
    }
}

/// In-memory store for tests.
#[cfg(test)]
#[derive(Default)]
pub struct FakeStore {
    pub collections: Vec<Collection>,
    pub items: Vec<(String, SavedItem)>,
    pub fail_with: Option<String>,
    /// Collection listings that fail before one succeeds
    pub collection_failures: std::sync::atomic::AtomicU32,
    pub created: std::sync::Mutex<Vec<NewItem>>,
}

#[cfg(test)]
impl FakeStore {
    pub fn created(&self) -> Vec<NewItem> {
        self.created.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
#[async_trait]
impl ReferenceStore for FakeStore {
    async fn create_item(&self, item: &NewItem) -> Result<String> {
        if let Some(message) = &self.fail_with {
            return Err(LitscoutError::Api {
                code: 403,
                message: message.clone(),
            });
        }
        let mut created = self
            .created
            .lock()
            .map_err(|_| LitscoutError::Validation("poisoned".to_string()))?;
        created.push(item.clone());
        Ok(format!("KEY{}", created.len()))
    }

    async fn collections(&self) -> Result<Vec<Collection>> {
        use std::sync::atomic::Ordering;
        let failing = self
            .collection_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LitscoutError::Api {
                code: 503,
                message: "collections unavailable".to_string(),
            });
        }
        Ok(self.collections.clone())
    }

    async fn collection_items(&self, collection_key: &str) -> Result<Vec<SavedItem>> {
        Ok(self
            .items
            .iter()
            .filter(|(key, _)| key == collection_key)
            .map(|(_, item)| item.clone())
            .collect())
    }

    async fn search_items(&self, query: &str) -> Result<Vec<SavedItem>> {
        Ok(self
            .items
            .iter()
            .filter(|(_, item)| item.title.contains(query))
            .map(|(_, item)| item.clone())
            .collect())
    }
}
