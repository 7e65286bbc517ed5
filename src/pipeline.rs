//! Multi-keyword runs.
//!
//! Each keyword line is searched on its own; accepted records are analysed
//! and, when a store is configured, saved. The run stops early on
//! cancellation or when the primary source blocks the session.

use crate::error::LitscoutError;
use crate::processing::ProcessingAgent;
use crate::search::{CancelFlag, SearchAgent};
use crate::zotero::{SaveOutcome, ZoteroAgent};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// A keyword whose search could not run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeywordFailure {
    pub keyword: String,
    pub error: String,
}

/// Summary of one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub outcomes: Vec<SaveOutcome>,
    pub failed_keywords: Vec<KeywordFailure>,
    pub saved: usize,
    pub total: usize,
    pub errors: usize,
    /// Run ended before every keyword was searched
    pub stopped: bool,
}

impl RunReport {
    fn push(&mut self, outcome: SaveOutcome) {
        self.total += 1;
        if outcome.saved_to_zotero {
            self.saved += 1;
        }
        if outcome.error.is_some() || outcome.article.error.is_some() {
            self.errors += 1;
        }
        self.outcomes.push(outcome);
    }
}

/// Search, analyse and save, keyword by keyword.
pub struct Pipeline {
    search: SearchAgent,
    processing: ProcessingAgent,
    zotero: Option<ZoteroAgent>,
    cancel: CancelFlag,
}

impl Pipeline {
    /// `zotero = None` runs without saving. The cancel flag is shared with
    /// the search agent.
    pub fn new(
        search: SearchAgent,
        processing: ProcessingAgent,
        zotero: Option<ZoteroAgent>,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            search: search.with_cancel_flag(cancel.clone()),
            processing,
            zotero,
            cancel,
        }
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Split text into keyword lines, skipping blanks.
    pub fn keyword_lines(text: &str) -> Vec<String> {
        text.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub async fn run(&self, keywords: &[String]) -> RunReport {
        let mut report = RunReport::default();

        for (idx, keyword) in keywords.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(remaining = keywords.len() - idx, "Run cancelled");
                report.stopped = true;
                break;
            }

            info!(keyword = %keyword, index = idx + 1, total = keywords.len(), "Searching keyword");
            let records = match self.search.search(std::slice::from_ref(keyword)).await {
                Ok(records) => records,
                Err(e) => {
                    let blocked = matches!(e, LitscoutError::SearchUnavailable { .. })
                        && e.is_bot_detection();
                    report.failed_keywords.push(KeywordFailure {
                        keyword: keyword.clone(),
                        error: e.to_string(),
                    });
                    if blocked {
                        error!(keyword = %keyword, error = %e, "Search source is blocking requests, stopping run");
                        report.stopped = true;
                        break;
                    }
                    warn!(keyword = %keyword, error = %e, "Keyword search failed, continuing");
                    continue;
                }
            };

            for record in records {
                if self.cancel.is_cancelled() {
                    report.stopped = true;
                    break;
                }
                let article = self.processing.process_article(record).await;
                let outcome = match &self.zotero {
                    Some(zotero) => zotero.save_article(article).await,
                    None => SaveOutcome {
                        article,
                        saved_to_zotero: false,
                        zotero_key: None,
                        error: None,
                    },
                };
                report.push(outcome);
            }
            if report.stopped {
                break;
            }
        }

        info!(
            total = report.total,
            saved = report.saved,
            errors = report.errors,
            stopped = report.stopped,
            "Run complete"
        );
        report
    }
}
