//! Field reconciliation.
//!
//! Raw citation text goes through an ordered chain of extraction strategies;
//! the first one that recovers anything wins. Records that end up with a
//! title but no abstract get one synthesized by the response generator and
//! are flagged as such.

use crate::citation::{parse_scholar_bibtex, parse_structured, split_authors};
use crate::llm::{extract_json, ResponseGenerator};
use crate::prompts::{build_citation_prompt, build_synthesis_prompt};
use crate::record::ExtractedFields;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One way of turning citation text into fields.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` when this strategy recovered nothing.
    async fn extract(&self, raw: &str) -> Option<ExtractedFields>;
}

/// Google Scholar's compact BibTeX layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScholarPatternStrategy;

#[async_trait]
impl ExtractionStrategy for ScholarPatternStrategy {
    fn name(&self) -> &'static str {
        "scholar_patterns"
    }

    async fn extract(&self, raw: &str) -> Option<ExtractedFields> {
        let fields = parse_scholar_bibtex(raw);
        (!fields.is_empty()).then_some(fields)
    }
}

/// Generic BibTeX parse with header repair.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredCitationStrategy;

#[async_trait]
impl ExtractionStrategy for StructuredCitationStrategy {
    fn name(&self) -> &'static str {
        "structured_bibtex"
    }

    async fn extract(&self, raw: &str) -> Option<ExtractedFields> {
        parse_structured(raw)
    }
}

/// Ask the model for a JSON object with the standard keys.
pub struct ModelExtractionStrategy {
    generator: Arc<dyn ResponseGenerator>,
}

impl ModelExtractionStrategy {
    pub fn new(generator: Arc<dyn ResponseGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl ExtractionStrategy for ModelExtractionStrategy {
    fn name(&self) -> &'static str {
        "model_json"
    }

    async fn extract(&self, raw: &str) -> Option<ExtractedFields> {
        if raw.trim().is_empty() {
            return None;
        }

        let response = match self.generator.generate(&build_citation_prompt(raw)).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Model extraction unavailable");
                return None;
            }
        };

        match serde_json::from_str::<Value>(&extract_json(&response)) {
            Ok(value) => fields_from_json(&value),
            Err(e) => {
                let preview: String = response.chars().take(200).collect();
                warn!(error = %e, content_preview = %preview, "Failed to parse model response as JSON");
                None
            }
        }
    }
}

/// Read the model's JSON leniently: numbers for strings, a string or array
/// for authors, `journal` for `venue`.
fn fields_from_json(value: &Value) -> Option<ExtractedFields> {
    let obj = value.as_object()?;

    let text = |key: &str| -> String {
        match obj.get(key) {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    };

    let authors = match obj.get("authors").or_else(|| obj.get("author")) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect(),
        Some(Value::String(s)) if s.contains(" and ") => split_authors(s),
        Some(Value::String(s)) => s
            .split([',', ';'])
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect(),
        _ => Vec::new(),
    };

    let mut venue = text("venue");
    if venue.is_empty() {
        venue = text("journal");
    }

    let fields = ExtractedFields {
        title: text("title"),
        authors,
        year: text("year"),
        venue,
        abstract_text: text("abstract"),
        url: text("url"),
        doi: text("doi"),
        ..Default::default()
    };
    (!fields.is_empty()).then_some(fields)
}

/// Ordered strategy chain plus abstract synthesis.
pub struct Reconciler {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    generator: Arc<dyn ResponseGenerator>,
}

impl Reconciler {
    /// Structured parse first, then model extraction.
    pub fn new(generator: Arc<dyn ResponseGenerator>) -> Self {
        let strategies: Vec<Box<dyn ExtractionStrategy>> = vec![
            Box::new(StructuredCitationStrategy),
            Box::new(ModelExtractionStrategy::new(generator.clone())),
        ];
        Self::with_strategies(strategies, generator)
    }

    pub fn with_strategies(
        strategies: Vec<Box<dyn ExtractionStrategy>>,
        generator: Arc<dyn ResponseGenerator>,
    ) -> Self {
        Self {
            strategies,
            generator,
        }
    }

    /// Reconcile raw citation text found for `query`.
    ///
    /// Never fails: when nothing is recovered the result is empty.
    pub async fn reconcile(&self, raw: &str, query: &str) -> ExtractedFields {
        let mut fields = ExtractedFields::default();
        for strategy in &self.strategies {
            if let Some(found) = strategy.extract(raw).await {
                debug!(strategy = strategy.name(), title = %found.title, "Extraction succeeded");
                fields = found;
                break;
            }
            debug!(strategy = strategy.name(), "Extraction yielded nothing");
        }

        if fields.is_empty() {
            info!("No fields recovered from citation");
            return fields;
        }

        if fields.has_title() && fields.abstract_text.trim().is_empty() {
            self.synthesize_abstract(&mut fields, query).await;
        }
        fields
    }

    async fn synthesize_abstract(&self, fields: &mut ExtractedFields, query: &str) {
        let authors = fields.authors.join(", ");
        let prompt = build_synthesis_prompt(
            &fields.title,
            query,
            &[
                ("year", fields.year.as_str()),
                ("venue", fields.venue.as_str()),
                ("authors", authors.as_str()),
            ],
        );

        match self.generator.generate(&prompt).await {
            Ok(text) if !text.trim().is_empty() => {
                debug!(title = %fields.title, "Synthesized abstract");
                fields.abstract_text = text.trim().to_string();
                fields.abstract_generated = true;
            }
            Ok(_) => debug!(title = %fields.title, "Model returned an empty abstract"),
            Err(e) => warn!(title = %fields.title, error = %e, "Abstract synthesis failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use crate::llm::FakeGenerator;

    const WELL_FORMED: &str = "@article{smith2024,\n  title = {Agentic RAG in Practice},\n  author = {Smith, Jane and Doe, John},\n  year = {2024},\n  doi = {10.1234/agentic.5678}\n}";

    fn scripted() -> Arc<FakeGenerator> {
        Arc::new(FakeGenerator::new(|prompt| {
            if prompt.contains("Output strict JSON") {
                Ok(r#"```json
{"title": "Recovered Title", "authors": "Ann Lee, Bo Chen", "year": 2019, "abstract": "", "journal": "Nature", "url": "", "doi": ""}
```"#
                    .to_string())
            } else {
                Ok("A synthesized abstract.".to_string())
            }
        }))
    }

    #[tokio::test]
    async fn test_structured_citation_gets_doi_url_and_generated_abstract() {
        let generator = scripted();
        let reconciler = Reconciler::new(generator.clone());

        let fields = reconciler.reconcile(WELL_FORMED, "agentic RAG").await;
        assert_eq!(fields.title, "Agentic RAG in Practice");
        assert_eq!(fields.url, "https://doi.org/10.1234/agentic.5678");
        assert_eq!(fields.abstract_text, "A synthesized abstract.");
        assert!(fields.abstract_generated);

        // Only the synthesis prompt went to the model
        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Search query: agentic RAG"));
        assert!(prompts[0].contains("year: 2024"));
    }

    #[tokio::test]
    async fn test_free_text_falls_back_to_model() {
        let reconciler = Reconciler::new(scripted());

        let fields = reconciler
            .reconcile("Lee A., Chen B. Recovered Title. Nature 2019.", "q")
            .await;
        assert_eq!(fields.title, "Recovered Title");
        assert_eq!(fields.authors, vec!["Ann Lee", "Bo Chen"]);
        assert_eq!(fields.year, "2019");
        assert_eq!(fields.venue, "Nature");
        assert!(fields.abstract_generated);
    }

    #[tokio::test]
    async fn test_undecodable_model_output_gives_empty_record() {
        let generator = Arc::new(FakeGenerator::replying("I cannot help with that."));
        let reconciler = Reconciler::new(generator.clone());

        let fields = reconciler.reconcile("garbled citation text", "q").await;
        assert!(fields.is_empty());
        assert!(!fields.abstract_generated);
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_generation_error_leaves_abstract_empty() {
        let generator = Arc::new(FakeGenerator::failing(GenerationError::ServiceUnavailable(
            "http://localhost:11434".to_string(),
        )));
        let reconciler = Reconciler::new(generator);

        let fields = reconciler.reconcile(WELL_FORMED, "agentic RAG").await;
        assert_eq!(fields.title, "Agentic RAG in Practice");
        assert!(fields.abstract_text.is_empty());
        assert!(!fields.abstract_generated);
    }

    #[tokio::test]
    async fn test_existing_abstract_not_synthesized() {
        let generator = scripted();
        let reconciler = Reconciler::new(generator.clone());
        let bib = "@article{k,\n  title = {T},\n  abstract = {Real abstract.}\n}";

        let fields = reconciler.reconcile(bib, "q").await;
        assert_eq!(fields.abstract_text, "Real abstract.");
        assert!(!fields.abstract_generated);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_scholar_pattern_strategy() {
        let strategy = ScholarPatternStrategy;
        assert!(strategy.extract("no record here").await.is_none());

        let fields = strategy
            .extract("@article{k,\n  title={Compact},\n  year={2021}\n}")
            .await
            .expect("fields");
        assert_eq!(fields.title, "Compact");
    }

    #[test]
    fn test_fields_from_json_author_array() {
        let value: Value = serde_json::from_str(
            r#"{"title": "T", "authors": ["A One", " ", "B Two"], "doi": "10.1/x"}"#,
        )
        .expect("json");
        let fields = fields_from_json(&value).expect("fields");
        assert_eq!(fields.authors, vec!["A One", "B Two"]);
        assert_eq!(fields.doi, "10.1/x");
        assert!(fields_from_json(&serde_json::json!([1, 2])).is_none());
    }
}
