//! Candidate records produced per search hit.
//!
//! A record is created by the search orchestrator, filled in by the
//! reconciler, enhancer and backfill stages, and frozen once it is accepted
//! or dropped.

use serde::{Deserialize, Serialize};

/// Source tag for records built from the primary search source.
pub const SOURCE_PRIMARY: &str = "scholar";

/// Source tag for records enhanced from the secondary metadata source.
pub const SOURCE_SECONDARY: &str = "secondary";

/// A single paper's reconciled metadata before the persistence decision.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CandidateRecord {
    pub title: String,
    pub authors: Vec<String>,
    /// Free-form, not guaranteed numeric
    pub year: String,
    pub venue: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    /// Abstract was synthesized by the language model
    pub abstract_generated: bool,
    pub url: String,
    pub doi: String,
    pub citation_count: u64,
    pub source_tag: String,
    /// Category tags from the secondary source
    pub categories: Vec<String>,
    /// Original unparsed citation text
    pub raw_citation: String,
    /// Query terms this record was found with
    pub keywords: Vec<String>,
    /// ISO-8601 timestamp of the search
    pub search_timestamp: String,
}

impl CandidateRecord {
    /// Eligible for downstream acceptance: a title and either an abstract or a URL.
    pub fn is_acceptable(&self) -> bool {
        !self.title.trim().is_empty()
            && (!self.abstract_text.trim().is_empty() || !self.url.trim().is_empty())
    }

    /// Why [`is_acceptable`](Self::is_acceptable) fails, if it does.
    pub fn rejection_reason(&self) -> Option<&'static str> {
        if self.title.trim().is_empty() {
            Some("missing title")
        } else if self.abstract_text.trim().is_empty() && self.url.trim().is_empty() {
            Some("missing both abstract and url")
        } else {
            None
        }
    }
}

/// Fields recovered from a citation by one extraction strategy.
///
/// Empty strings / vectors mean "not found".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedFields {
    pub title: String,
    pub authors: Vec<String>,
    pub year: String,
    pub venue: String,
    pub abstract_text: String,
    pub url: String,
    pub doi: String,
    /// arXiv identifier from an `eprint` field or `arXiv:` token
    pub arxiv_id: String,
    pub abstract_generated: bool,
}

impl ExtractedFields {
    /// True when nothing at all was recovered.
    pub fn is_empty(&self) -> bool {
        self.title.is_empty()
            && self.authors.is_empty()
            && self.year.is_empty()
            && self.venue.is_empty()
            && self.abstract_text.is_empty()
            && self.url.is_empty()
            && self.doi.is_empty()
    }

    /// A title usable for acceptance was recovered.
    pub fn has_title(&self) -> bool {
        !self.title.trim().is_empty()
    }
}

/// Pick `preferred` unless it is empty.
pub fn prefer_non_empty(preferred: &str, fallback: &str) -> String {
    if preferred.trim().is_empty() {
        fallback.trim().to_string()
    } else {
        preferred.trim().to_string()
    }
}

/// Pick `candidate` over `existing` only when it is strictly longer.
///
/// An empty `existing` always loses to a non-empty candidate.
pub fn prefer_longer(existing: &str, candidate: &str) -> String {
    if candidate.trim().chars().count() > existing.trim().chars().count() {
        candidate.trim().to_string()
    } else {
        existing.to_string()
    }
}

/// Flat row for CSV export.
#[derive(Debug, Serialize)]
pub struct RecordRow {
    pub title: String,
    pub authors: String,
    pub year: String,
    pub venue: String,
    pub doi: String,
    pub url: String,
    pub citation_count: u64,
    pub source_tag: String,
    pub categories: String,
    pub abstract_generated: bool,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub keywords: String,
    pub search_timestamp: String,
}

impl From<&CandidateRecord> for RecordRow {
    fn from(r: &CandidateRecord) -> Self {
        Self {
            title: r.title.clone(),
            authors: r.authors.join("; "),
            year: r.year.clone(),
            venue: r.venue.clone(),
            doi: r.doi.clone(),
            url: r.url.clone(),
            citation_count: r.citation_count,
            source_tag: r.source_tag.clone(),
            categories: r.categories.join(", "),
            abstract_generated: r.abstract_generated,
            abstract_text: r.abstract_text.clone(),
            keywords: r.keywords.join(", "),
            search_timestamp: r.search_timestamp.clone(),
        }
    }
}
