//! # litscout
//!
//! Literature discovery pipeline: Google Scholar search, arXiv enrichment,
//! language-model summaries and Zotero persistence.
//!
//! ## Modules
//!
//! - [`scholar`] - Google Scholar result pages, BibTeX fill, bot detection
//! - [`citation`] - BibTeX field extraction
//! - [`reconcile`] - Field reconciliation strategies and abstract synthesis
//! - [`arxiv`] - arXiv identifier detection and Atom API client
//! - [`enhance`] - arXiv metadata merge
//! - [`backfill`] - Abstract recovery from landing pages
//! - [`llm`] - Response generators (Ollama, OpenAI-compatible)
//! - [`search`] - Search orchestration
//! - [`processing`] - Per-article analysis and keywords
//! - [`zotero`] - Zotero Web API client and save policy
//! - [`pipeline`] - Multi-keyword runs
//! - [`cookies`] - Scholar session cookies
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use litscout::config::Config;
//! use litscout::cookies::CookieStore;
//! use litscout::identity::IdentityRotator;
//! use litscout::retry::RetryPolicy;
//! use litscout::{arxiv, backfill, llm, scholar, search};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let retry = RetryPolicy::new(&config.retry);
//!     let rotator = Arc::new(IdentityRotator::new(config.search.proxies.clone()));
//!     let source = scholar::ScholarClient::new(&config.search, rotator.clone(), CookieStore::new()?);
//!     let timeout = Duration::from_secs(config.search.request_timeout_secs);
//!
//!     let agent = search::SearchAgent::new(
//!         config.search.max_results,
//!         Arc::new(source),
//!         rotator,
//!         llm::build_generator(&config.llm, retry.clone())?,
//!         Arc::new(arxiv::ArxivClient::new(timeout)?),
//!         Arc::new(backfill::HttpPageFetcher::new(timeout)),
//!         retry,
//!     );
//!     let records = agent.search(&["agentic RAG".to_string()]).await?;
//!     println!("Found {} records", records.len());
//!     Ok(())
//! }
//! ```

pub mod arxiv;
pub mod backfill;
pub mod citation;
pub mod config;
pub mod cookies;
pub mod enhance;
pub mod error;
pub mod identity;
pub mod llm;
pub mod pipeline;
pub mod processing;
pub mod prompts;
pub mod reconcile;
pub mod record;
pub mod retry;
pub mod scholar;
pub mod search;
pub mod zotero;

pub use error::{LitscoutError, Result};
