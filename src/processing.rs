//! Per-article analysis.
//!
//! Each accepted record is summarized by the response generator, and a short
//! keyword list is derived from that summary for tagging.

use crate::llm::ResponseGenerator;
use crate::prompts::{build_analysis_prompt, build_keywords_prompt};
use crate::record::CandidateRecord;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Most keywords kept from one extraction.
const MAX_KEYWORDS: usize = 7;

/// Model-written analysis of one article.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ArticleAnalysis {
    pub full_analysis: String,
    pub keywords: Vec<String>,
}

/// A record after the processing step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProcessedArticle {
    #[serde(flatten)]
    pub record: CandidateRecord,
    pub analysis: Option<ArticleAnalysis>,
    /// Why analysis is missing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<CandidateRecord> for ProcessedArticle {
    fn from(record: CandidateRecord) -> Self {
        Self {
            record,
            analysis: None,
            error: None,
        }
    }
}

/// Runs analysis and keyword prompts.
pub struct ProcessingAgent {
    generator: Arc<dyn ResponseGenerator>,
}

impl ProcessingAgent {
    pub fn new(generator: Arc<dyn ResponseGenerator>) -> Self {
        Self { generator }
    }

    /// Analyse one record. A generation failure is recorded in `error`.
    pub async fn process_article(&self, record: CandidateRecord) -> ProcessedArticle {
        let title = record.title.clone();
        debug!(title = %title, "Analyzing article");

        let prompt = build_analysis_prompt(&record.title, &record.abstract_text);
        let analysis = match self.generator.generate(&prompt).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!(title = %title, error = %e, "Analysis failed");
                return ProcessedArticle {
                    record,
                    analysis: None,
                    error: Some(e.to_string()),
                };
            }
        };

        let keywords = match self.generator.generate(&build_keywords_prompt(&analysis)).await {
            Ok(text) => parse_keywords(&text),
            Err(e) => {
                warn!(title = %title, error = %e, "Keyword extraction failed");
                return ProcessedArticle {
                    record,
                    analysis: None,
                    error: Some(e.to_string()),
                };
            }
        };

        info!(title = %title, keywords = keywords.len(), "Article analyzed");
        ProcessedArticle {
            record,
            analysis: Some(ArticleAnalysis {
                full_analysis: analysis,
                keywords,
            }),
            error: None,
        }
    }
}

/// Split a comma-separated keyword answer, dropping list markers, quotes and
/// duplicates.
pub fn parse_keywords(text: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for raw in text.split([',', '\n']) {
        let keyword = strip_list_marker(raw.trim())
            .trim_matches(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '.'))
            .to_string();
        if keyword.is_empty()
            || keywords.iter().any(|k| k.eq_ignore_ascii_case(&keyword))
        {
            continue;
        }
        keywords.push(keyword);
        if keywords.len() == MAX_KEYWORDS {
            break;
        }
    }
    keywords
}

/// `1.`, `2)`, `-` and `*` prefixes.
fn strip_list_marker(text: &str) -> &str {
    let text = text.trim_start_matches(['-', '*']).trim_start();
    let digits = text.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        if let Some(rest) = text[digits..].strip_prefix(['.', ')']) {
            return rest;
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use crate::llm::FakeGenerator;

    fn record() -> CandidateRecord {
        CandidateRecord {
            title: "Agentic RAG in Practice".to_string(),
            abstract_text: "We study agents.".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_process_article() {
        let generator = Arc::new(FakeGenerator::new(|prompt| {
            if prompt.contains("extract 5-7 keywords") {
                Ok("retrieval, agents, RAG, evaluation, retrieval".to_string())
            } else {
                Ok("1. Contributions: a framework.".to_string())
            }
        }));
        let agent = ProcessingAgent::new(generator.clone());

        let processed = agent.process_article(record()).await;
        assert!(processed.error.is_none());
        let analysis = processed.analysis.expect("analysis");
        assert_eq!(analysis.full_analysis, "1. Contributions: a framework.");
        assert_eq!(analysis.keywords, vec!["retrieval", "agents", "RAG", "evaluation"]);

        let prompts = generator.prompts();
        assert!(prompts[0].contains("Abstract: We study agents."));
        assert!(prompts[1].contains("1. Contributions: a framework."));
    }

    #[tokio::test]
    async fn test_generation_failure_sets_error() {
        let err = GenerationError::ModelUnavailable("llama3.2".to_string());
        let agent = ProcessingAgent::new(Arc::new(FakeGenerator::failing(err.clone())));

        let processed = agent.process_article(record()).await;
        assert!(processed.analysis.is_none());
        assert_eq!(processed.error, Some(err.to_string()));
        assert_eq!(processed.record.title, "Agentic RAG in Practice");
    }

    #[test]
    fn test_parse_keywords_cleans_markup() {
        assert_eq!(
            parse_keywords("1. \"Graph Neural Networks\"\n2. Drug Discovery.\n3) RAG"),
            vec!["Graph Neural Networks", "Drug Discovery", "RAG"]
        );
        assert_eq!(parse_keywords("3D printing, - CRISPR"), vec!["3D printing", "CRISPR"]);
        assert!(parse_keywords("  ,  ").is_empty());
        assert_eq!(parse_keywords("a,b,c,d,e,f,g,h,i").len(), MAX_KEYWORDS);
    }
}
