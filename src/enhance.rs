//! Metadata enhancement from the secondary source.

use crate::arxiv::{find_arxiv_id, MetadataSource};
use crate::record::{prefer_longer, CandidateRecord, SOURCE_SECONDARY};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fills gaps in a record from arXiv when the record carries an arXiv id.
pub struct MetadataEnhancer {
    source: Arc<dyn MetadataSource>,
}

impl MetadataEnhancer {
    pub fn new(source: Arc<dyn MetadataSource>) -> Self {
        Self { source }
    }

    /// Enhance `record`. The URL is scanned before the raw citation; no
    /// identifier or a failed lookup returns the record unchanged.
    ///
    /// Merge rules: the longer abstract wins, authors and DOI are only filled
    /// when missing, categories are always replaced.
    pub async fn enhance(&self, record: CandidateRecord) -> CandidateRecord {
        let Some(arxiv_id) =
            find_arxiv_id(&record.url).or_else(|| find_arxiv_id(&record.raw_citation))
        else {
            return record;
        };

        let fetched = match self.source.lookup(&arxiv_id).await {
            Ok(Some(fetched)) => fetched,
            Ok(None) => {
                debug!(id = %arxiv_id, "No arXiv record, leaving candidate unchanged");
                return record;
            }
            Err(e) => {
                warn!(id = %arxiv_id, error = %e, "arXiv lookup failed, leaving candidate unchanged");
                return record;
            }
        };

        let mut record = record;
        let abstract_text = prefer_longer(&record.abstract_text, &fetched.abstract_text);
        if abstract_text != record.abstract_text {
            record.abstract_text = abstract_text;
            record.abstract_generated = false;
        }
        if record.authors.is_empty() {
            record.authors = fetched.authors;
        }
        if record.doi.is_empty() {
            if let Some(doi) = fetched.doi.filter(|d| !d.trim().is_empty()) {
                record.doi = doi;
            }
        }
        record.categories = fetched.categories;
        record.source_tag = SOURCE_SECONDARY.to_string();

        info!(id = %arxiv_id, title = %record.title, "Enhanced from arXiv");
        record
    }
}
