//! Search orchestration.
//!
//! One call to [`SearchAgent::search`] runs the whole per-keyword pipeline:
//! query the primary source (retrying with identity rotation), then for each
//! hit fill its citation, reconcile fields, enhance from arXiv, backfill the
//! abstract, and keep the record if it is acceptable.

use crate::arxiv::MetadataSource;
use crate::backfill::{AbstractBackfill, PageFetcher};
use crate::enhance::MetadataEnhancer;
use crate::error::{LitscoutError, Result};
use crate::identity::IdentityRotator;
use crate::llm::ResponseGenerator;
use crate::reconcile::{ExtractionStrategy, Reconciler, ScholarPatternStrategy};
use crate::record::{prefer_non_empty, CandidateRecord, ExtractedFields, SOURCE_PRIMARY};
use crate::retry::{RetryError, RetryPolicy};
use crate::scholar::{FilledHit, HitStream, ScholarHit, ScholarSource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cooperative cancellation, checked before each keyword and each hit.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives search, reconciliation, enhancement and backfill.
pub struct SearchAgent {
    source: Arc<dyn ScholarSource>,
    rotator: Arc<IdentityRotator>,
    native: ScholarPatternStrategy,
    reconciler: Reconciler,
    enhancer: MetadataEnhancer,
    backfill: AbstractBackfill,
    retry: RetryPolicy,
    max_results: usize,
    cancel: CancelFlag,
}

impl SearchAgent {
    pub fn new(
        max_results: usize,
        source: Arc<dyn ScholarSource>,
        rotator: Arc<IdentityRotator>,
        generator: Arc<dyn ResponseGenerator>,
        metadata: Arc<dyn MetadataSource>,
        fetcher: Arc<dyn PageFetcher>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            rotator,
            native: ScholarPatternStrategy,
            reconciler: Reconciler::new(generator.clone()),
            enhancer: MetadataEnhancer::new(metadata.clone()),
            backfill: AbstractBackfill::new(fetcher, metadata, generator, retry.clone()),
            retry,
            max_results,
            cancel: CancelFlag::default(),
        }
    }

    /// Share a cancellation flag with the caller.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    /// Search for `keywords` (joined into one query).
    ///
    /// Fails only when the query itself cannot be run
    /// ([`LitscoutError::SearchUnavailable`]); problems with individual hits
    /// are logged and the hit is skipped.
    pub async fn search(&self, keywords: &[String]) -> Result<Vec<CandidateRecord>> {
        let query = keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if query.is_empty() {
            return Err(LitscoutError::Validation("No keywords given".to_string()));
        }

        let timestamp = chrono::Utc::now().to_rfc3339();
        let mut stream = self.open_stream(&query).await?;
        let mut results = Vec::new();

        for index in 0..self.max_results {
            if self.cancel.is_cancelled() {
                info!(query = %query, processed = index, "Search cancelled");
                break;
            }

            let hit = match stream.next_hit().await {
                Ok(Some(hit)) => hit,
                Ok(None) => {
                    debug!(query = %query, index, "Result sequence exhausted");
                    break;
                }
                Err(e) => {
                    warn!(query = %query, index, error = %e, "Failed to read next hit");
                    continue;
                }
            };

            let Some(filled) = self.fill_with_retry(&hit).await else {
                continue;
            };

            let record = self.build_record(filled, &query, keywords, &timestamp).await;
            let mut record = self.enhancer.enhance(record).await;
            if record.abstract_text.trim().is_empty() && !record.url.trim().is_empty() {
                record.abstract_text = self.backfill.backfill(&record.url).await;
            }

            match record.rejection_reason() {
                None => {
                    info!(index, title = %record.title, source = %record.source_tag, "Accepted record");
                    results.push(record);
                }
                Some(reason) => {
                    info!(index, title = %record.title, reason, "Dropped record");
                }
            }
        }

        info!(query = %query, count = results.len(), "Search complete");
        Ok(results)
    }

    /// Run the query, rotating identity after bot detection.
    async fn open_stream(&self, query: &str) -> Result<Box<dyn HitStream>> {
        let source = &self.source;
        let rotator = &self.rotator;

        self.retry
            .run(
                "scholar_search",
                |_| source.search(query),
                |_| true,
                |e: &LitscoutError| {
                    if e.is_bot_detection() {
                        rotator.rotate();
                    }
                },
            )
            .await
            .map_err(|e| {
                let attempts = e.attempts();
                let reason = e.into_inner().to_string();
                warn!(query = query, attempts, reason = %reason, "Search unavailable");
                LitscoutError::SearchUnavailable { attempts, reason }
            })
    }

    /// Fill a hit; only bot detection is retried. `None` skips the hit.
    async fn fill_with_retry(&self, hit: &ScholarHit) -> Option<FilledHit> {
        let result = self
            .retry
            .run(
                "scholar_fill",
                |_| self.source.fill(hit),
                LitscoutError::is_bot_detection,
                |_| {
                    self.rotator.rotate();
                },
            )
            .await;

        match result {
            Ok(filled) => Some(filled),
            Err(RetryError::Exhausted { attempts, last }) => {
                warn!(title = %hit.title, attempts, error = %last, "Skipping hit, source keeps blocking");
                None
            }
            Err(RetryError::Aborted { error, .. }) => {
                warn!(title = %hit.title, error = %error, "Skipping hit");
                None
            }
        }
    }

    /// Native citation patterns first, the general reconciler otherwise;
    /// the hit's own listing fills whatever is still missing.
    async fn build_record(
        &self,
        filled: FilledHit,
        query: &str,
        keywords: &[String],
        timestamp: &str,
    ) -> CandidateRecord {
        let FilledHit { hit, bibtex } = filled;

        let fields = match self
            .native
            .extract(&bibtex)
            .await
            .filter(ExtractedFields::has_title)
        {
            Some(fields) => {
                debug!(title = %fields.title, "Parsed native citation");
                fields
            }
            None => self.reconciler.reconcile(&bibtex, query).await,
        };

        let authors = if fields.authors.is_empty() {
            hit.author_list()
        } else {
            fields.authors
        };

        CandidateRecord {
            title: prefer_non_empty(&fields.title, &hit.title),
            authors,
            year: prefer_non_empty(&fields.year, &hit.year),
            venue: prefer_non_empty(&fields.venue, &hit.venue),
            abstract_text: fields.abstract_text.trim().to_string(),
            abstract_generated: fields.abstract_generated,
            url: prefer_non_empty(&fields.url, &hit.article_url),
            doi: fields.doi,
            citation_count: hit.citations,
            source_tag: SOURCE_PRIMARY.to_string(),
            categories: Vec::new(),
            raw_citation: bibtex,
            keywords: keywords.to_vec(),
            search_timestamp: timestamp.to_string(),
        }
    }
}

/// Scripted primary source for tests.
#[cfg(test)]
pub mod fake {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    type SearchFn = Box<dyn Fn(u32) -> Result<()> + Send + Sync>;
    type FillFn = Box<dyn Fn(&ScholarHit) -> Result<String> + Send + Sync>;

    pub struct FakeSource {
        pub hits: Vec<ScholarHit>,
        search: SearchFn,
        fill: FillFn,
        searches: AtomicU32,
        fills: Mutex<Vec<String>>,
    }

    impl FakeSource {
        /// `fill` returns the BibTeX for a hit.
        pub fn new(
            hits: Vec<ScholarHit>,
            fill: impl Fn(&ScholarHit) -> Result<String> + Send + Sync + 'static,
        ) -> Self {
            Self {
                hits,
                search: Box::new(|_| Ok(())),
                fill: Box::new(fill),
                searches: AtomicU32::new(0),
                fills: Mutex::new(Vec::new()),
            }
        }

        /// `search` gets the 0-indexed call number.
        pub fn with_search(
            mut self,
            search: impl Fn(u32) -> Result<()> + Send + Sync + 'static,
        ) -> Self {
            self.search = Box::new(search);
            self
        }

        pub fn searches(&self) -> u32 {
            self.searches.load(Ordering::SeqCst)
        }

        /// Titles of filled hits, one entry per call.
        pub fn fills(&self) -> Vec<String> {
            self.fills.lock().map(|f| f.clone()).unwrap_or_default()
        }
    }

    struct FakeStream(VecDeque<ScholarHit>);

    #[async_trait]
    impl HitStream for FakeStream {
        async fn next_hit(&mut self) -> Result<Option<ScholarHit>> {
            Ok(self.0.pop_front())
        }
    }

    #[async_trait]
    impl ScholarSource for FakeSource {
        async fn search(&self, _query: &str) -> Result<Box<dyn HitStream>> {
            let call = self.searches.fetch_add(1, Ordering::SeqCst);
            (self.search)(call)?;
            Ok(Box::new(FakeStream(self.hits.clone().into())))
        }

        async fn fill(&self, hit: &ScholarHit) -> Result<FilledHit> {
            if let Ok(mut fills) = self.fills.lock() {
                fills.push(hit.title.clone());
            }
            let bibtex = (self.fill)(hit)?;
            Ok(FilledHit {
                hit: hit.clone(),
                bibtex,
            })
        }
    }

    pub fn hit(title: &str, cluster_id: &str) -> ScholarHit {
        ScholarHit {
            title: title.to_string(),
            author: "J Smith, J Doe".to_string(),
            year: "2024".to_string(),
            cluster_id: cluster_id.to_string(),
            citations: 7,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::{hit, FakeSource};
    use super::*;
    use crate::arxiv::{ArxivRecord, FakeMetadataSource};
    use crate::backfill::FakeFetcher;
    use crate::llm::FakeGenerator;
    use crate::retry::RecordingSleeper;
    use std::time::Duration;

    const WELL_FORMED: &str = "@article{smith2024,\n  title = {Agentic RAG in Practice},\n  author = {Smith, Jane and Doe, John},\n  year = {2024},\n  doi = {10.1234/agentic.5678}\n}";

    struct Harness {
        source: Arc<FakeSource>,
        rotator: Arc<IdentityRotator>,
        sleeper: Arc<RecordingSleeper>,
        generator: Arc<FakeGenerator>,
        agent: SearchAgent,
    }

    fn harness(source: FakeSource, metadata: FakeMetadataSource, fetcher: FakeFetcher) -> Harness {
        let source = Arc::new(source);
        let rotator = Arc::new(IdentityRotator::default());
        let sleeper = Arc::new(RecordingSleeper::default());
        let generator = Arc::new(FakeGenerator::replying("Generated abstract."));
        let agent = SearchAgent::new(
            10,
            source.clone(),
            rotator.clone(),
            generator.clone(),
            Arc::new(metadata),
            Arc::new(fetcher),
            RetryPolicy::default().with_sleeper(sleeper.clone()),
        );
        Harness {
            source,
            rotator,
            sleeper,
            generator,
            agent,
        }
    }

    fn keywords(q: &str) -> Vec<String> {
        vec![q.to_string()]
    }

    #[tokio::test]
    async fn test_agentic_rag_end_to_end() -> Result<()> {
        let source = FakeSource::new(
            vec![hit("Agentic RAG in Practice", "c1"), hit("Blocked Paper", "c2")],
            |h| match h.cluster_id.as_str() {
                "c1" => Ok(WELL_FORMED.to_string()),
                _ => Err(LitscoutError::Parse(
                    "Our systems have detected unusual traffic from your computer network".to_string(),
                )),
            },
        );
        let h = harness(source, FakeMetadataSource::default(), FakeFetcher::serving(""));

        let results = h.agent.search(&keywords("agentic RAG")).await?;

        assert_eq!(results.len(), 1);
        let record = &results[0];
        assert_eq!(record.title, "Agentic RAG in Practice");
        assert_eq!(record.url, "https://doi.org/10.1234/agentic.5678");
        assert_eq!(record.doi, "10.1234/agentic.5678");
        assert_eq!(record.abstract_text, "Generated abstract.");
        assert!(record.abstract_generated);
        assert_eq!(record.authors, vec!["Jane Smith", "John Doe"]);
        assert_eq!(record.citation_count, 7);
        assert_eq!(record.keywords, vec!["agentic RAG"]);
        assert_eq!(record.raw_citation, WELL_FORMED);
        assert!(!record.search_timestamp.is_empty());

        // Hit 2 was tried three times with two rotations in between
        let fills = h.source.fills();
        assert_eq!(fills.iter().filter(|t| *t == "Blocked Paper").count(), 3);
        assert_eq!(h.rotator.rotations(), 2);
        assert_eq!(
            h.sleeper.delays(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_search_unavailable_after_three_attempts() {
        let source = FakeSource::new(vec![hit("Never", "c1")], |_| Ok(String::new()))
            .with_search(|_| Err(LitscoutError::BotDetected));
        let h = harness(source, FakeMetadataSource::default(), FakeFetcher::serving(""));

        let err = h
            .agent
            .search(&keywords("agentic RAG"))
            .await
            .expect_err("should fail");

        assert!(matches!(err, LitscoutError::SearchUnavailable { attempts: 3, .. }));
        assert!(err.is_bot_detection());
        assert_eq!(h.source.searches(), 3);
        assert_eq!(h.rotator.rotations(), 2);
        assert!(h.source.fills().is_empty());
    }

    #[tokio::test]
    async fn test_search_succeeds_on_kth_attempt() -> Result<()> {
        for k in 1..=3u32 {
            let source = FakeSource::new(Vec::new(), |_| Ok(String::new())).with_search(move |call| {
                if call + 1 < k {
                    Err(LitscoutError::RateLimited(60))
                } else {
                    Ok(())
                }
            });
            let h = harness(source, FakeMetadataSource::default(), FakeFetcher::serving(""));

            assert!(h.agent.search(&keywords("q")).await?.is_empty());
            assert_eq!(h.source.searches(), k);
            // Rate limiting is retried but does not rotate identity
            assert_eq!(h.rotator.rotations(), 0);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_title_never_accepted() -> Result<()> {
        let mut untitled = hit("", "c1");
        untitled.article_url = "https://example.org/untitled".to_string();
        let source = FakeSource::new(vec![untitled], |_| Ok(String::new()));
        let h = harness(
            source,
            FakeMetadataSource::default(),
            FakeFetcher::serving(r#"<div class="abstract">Has an abstract</div>"#),
        );

        let results = h.agent.search(&keywords("q")).await?;
        assert!(results.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_non_bot_fill_error_skips_only_that_hit() -> Result<()> {
        let source = FakeSource::new(vec![hit("Broken", "c1"), hit("Fine", "c2")], |h| {
            if h.cluster_id == "c1" {
                Err(LitscoutError::Api {
                    code: 500,
                    message: "server error".to_string(),
                })
            } else {
                Ok("@article{k,\n  title={Fine},\n  doi={10.1/fine}\n}".to_string())
            }
        });
        let h = harness(source, FakeMetadataSource::default(), FakeFetcher::serving(""));

        let results = h.agent.search(&keywords("q")).await?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Fine");
        assert_eq!(h.source.fills(), vec!["Broken", "Fine"]);
        assert_eq!(h.rotator.rotations(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_native_arxiv_citation_enhanced() -> Result<()> {
        let source = FakeSource::new(vec![hit("RAG Survey", "c1")], |_| {
            Ok("@article{gao2023,\n  title={Retrieval-augmented generation for large language models: A survey},\n  author={Gao, Yunfan and Xiong, Yun},\n  journal={arXiv preprint arXiv:2312.10997},\n  year={2023}\n}".to_string())
        });
        let metadata = FakeMetadataSource::with(
            "2312.10997",
            ArxivRecord {
                abstract_text: "Large Language Models showcase impressive capabilities.".to_string(),
                categories: vec!["cs.CL".to_string()],
                doi: Some("10.48550/arXiv.2312.10997".to_string()),
                ..Default::default()
            },
        );
        let h = harness(source, metadata, FakeFetcher::serving(""));

        let results = h.agent.search(&keywords("rag survey")).await?;
        assert_eq!(results.len(), 1);
        let record = &results[0];
        assert_eq!(record.url, "https://arxiv.org/abs/2312.10997");
        assert_eq!(record.source_tag, "secondary");
        assert_eq!(record.categories, vec!["cs.CL"]);
        assert_eq!(record.doi, "10.48550/arXiv.2312.10997");
        assert!(!record.abstract_generated);
        // Native path never asks the model
        assert_eq!(h.generator.calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_backfill_fills_missing_abstract() -> Result<()> {
        let mut listed = hit("Listed Only", "c1");
        listed.article_url = "https://example.org/paper".to_string();
        let source = FakeSource::new(vec![listed], |_| Ok(String::new()));
        let h = harness(
            source,
            FakeMetadataSource::default(),
            FakeFetcher::serving(r#"<div class="abstract">Sample text</div>"#),
        );

        let results = h.agent.search(&keywords("q")).await?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].abstract_text, "Sample text");
        assert_eq!(results[0].authors, vec!["J Smith", "J Doe"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_before_hits() -> Result<()> {
        let source = FakeSource::new(vec![hit("A", "c1")], |_| Ok(String::new()));
        let h = harness(source, FakeMetadataSource::default(), FakeFetcher::serving(""));
        let cancel = CancelFlag::new();
        let agent = h.agent.with_cancel_flag(cancel.clone());
        cancel.cancel();

        assert!(agent.search(&keywords("q")).await?.is_empty());
        assert!(h.source.fills().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_blank_keywords_rejected() {
        let h = harness(
            FakeSource::new(Vec::new(), |_| Ok(String::new())),
            FakeMetadataSource::default(),
            FakeFetcher::serving(""),
        );
        let err = h.agent.search(&[" ".to_string()]).await.expect_err("should fail");
        assert!(matches!(err, LitscoutError::Validation(_)));
        assert_eq!(h.source.searches(), 0);
    }
}
