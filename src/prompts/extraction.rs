//! Prompts that pull paper metadata out of unstructured text.

/// Citation-to-JSON extraction.
/// Placeholders: {citation}
pub const CITATION_JSON_TEMPLATE: &str = r#"Extract the bibliographic fields from this citation entry:

{citation}

Output strict JSON only (no markdown code blocks, no extra text) with exactly these keys:
{
  "title": "paper title",
  "authors": ["author 1", "author 2"],
  "year": "publication year",
  "abstract": "paper abstract, empty string if not present",
  "venue": "journal or conference",
  "url": "paper URL, empty string if not present",
  "doi": "DOI, empty string if not present"
}"#;

/// Abstract synthesis for records without one.
/// Placeholders: {title}, {query}, {context}
pub const ABSTRACT_SYNTHESIS_TEMPLATE: &str = r#"Based on this paper's title and the search query, write a brief academic abstract.

Title: {title}
Search query: {query}
Known fields: {context}

Write a concise abstract (3-5 sentences) that fits this paper. Output the abstract text only."#;

/// Abstract extraction from raw page text.
/// Placeholders: {page_text}
pub const PAGE_ABSTRACT_TEMPLATE: &str = r#"Given this webpage content, find and extract ONLY the research paper's abstract.
If there is no clear abstract, output nothing at all.

Webpage content:
{page_text}"#;

/// Characters of visible page text handed to the model.
pub const PAGE_TEXT_LIMIT: usize = 2000;

/// Build the citation extraction prompt.
pub fn build_citation_prompt(citation: &str) -> String {
    CITATION_JSON_TEMPLATE.replace("{citation}", citation.trim())
}

/// Build the abstract synthesis prompt.
///
/// `context` pairs are rendered as `key: value` and skipped when empty.
pub fn build_synthesis_prompt(title: &str, query: &str, context: &[(&str, &str)]) -> String {
    let context = context
        .iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .map(|(key, value)| format!("{}: {}", key, value.trim()))
        .collect::<Vec<_>>()
        .join(", ");

    ABSTRACT_SYNTHESIS_TEMPLATE
        .replace("{title}", title)
        .replace("{query}", query)
        .replace("{context}", if context.is_empty() { "none" } else { &context })
}

/// Build the page abstract prompt from the first [`PAGE_TEXT_LIMIT`] characters.
pub fn build_page_abstract_prompt(page_text: &str) -> String {
    let prefix: String = page_text.chars().take(PAGE_TEXT_LIMIT).collect();
    PAGE_ABSTRACT_TEMPLATE.replace("{page_text}", &prefix)
}
