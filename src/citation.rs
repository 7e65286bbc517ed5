//! BibTeX field extraction.
//!
//! Two parsers with different tolerance:
//!
//! - [`parse_scholar_bibtex`] reads the compact `key={value}` layout Google
//!   Scholar emits, with plain patterns. It accepts nothing else.
//! - [`parse_structured`] runs a real BibTeX parser and repairs text that
//!   lacks the `@type{` header first.
//!
//! Both derive a landing URL from the DOI or arXiv eprint when they can.

use crate::record::ExtractedFields;
use biblatex::{Bibliography, Chunk, Entry, Spanned};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

/// `https://doi.org/{doi}`
pub fn doi_url(doi: &str) -> String {
    format!("https://doi.org/{}", doi.trim())
}

/// `https://arxiv.org/abs/{id}`
pub fn arxiv_url(id: &str) -> String {
    format!("https://arxiv.org/abs/{}", id.trim())
}

struct ScholarPatterns {
    title: Regex,
    author: Regex,
    year: Regex,
    journal: Regex,
    booktitle: Regex,
    doi: Regex,
    eprint: Regex,
    arxiv_token: Regex,
}

fn scholar_patterns() -> Option<&'static ScholarPatterns> {
    static PATTERNS: OnceLock<Option<ScholarPatterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(ScholarPatterns {
                title: Regex::new(r"\btitle=\{([^}]+)\}").ok()?,
                author: Regex::new(r"\bauthor=\{([^}]+)\}").ok()?,
                year: Regex::new(r"\byear=\{([^}]+)\}").ok()?,
                journal: Regex::new(r"\bjournal=\{([^}]+)\}").ok()?,
                booktitle: Regex::new(r"\bbooktitle=\{([^}]+)\}").ok()?,
                doi: Regex::new(r"\bdoi=\{([^}]+)\}").ok()?,
                eprint: Regex::new(r"\beprint=\{([^}]+)\}").ok()?,
                arxiv_token: Regex::new(r"(?i)arxiv:(\d+\.\d+)").ok()?,
            })
        })
        .as_ref()
}

fn capture(re: &Regex, text: &str) -> String {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

/// Split a BibTeX author list (`A and B and C`).
pub fn split_authors(authors: &str) -> Vec<String> {
    authors
        .split(" and ")
        .map(|a| a.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|a| !a.is_empty())
        .collect()
}

/// Extract fields from Scholar's own BibTeX layout.
///
/// Returns empty fields if the text is not an `@`-prefixed record. A DOI
/// yields a doi.org URL; an arXiv eprint (or `arXiv:` token) yields an
/// arxiv.org URL and takes precedence.
pub fn parse_scholar_bibtex(raw: &str) -> ExtractedFields {
    let text = raw.trim();
    if !text.starts_with('@') {
        return ExtractedFields::default();
    }
    let Some(p) = scholar_patterns() else {
        return ExtractedFields::default();
    };

    let mut fields = ExtractedFields {
        title: capture(&p.title, text),
        authors: split_authors(&capture(&p.author, text)),
        year: capture(&p.year, text),
        venue: capture(&p.journal, text),
        ..Default::default()
    };
    if fields.venue.is_empty() {
        fields.venue = capture(&p.booktitle, text);
    }

    let doi = capture(&p.doi, text);
    if !doi.is_empty() {
        fields.url = doi_url(&doi);
        fields.doi = doi;
    }

    let mut arxiv_id = capture(&p.eprint, text);
    if arxiv_id.is_empty() {
        arxiv_id = capture(&p.arxiv_token, text);
    }
    if !arxiv_id.is_empty() {
        fields.url = arxiv_url(&arxiv_id);
        fields.arxiv_id = arxiv_id;
    }

    fields
}

/// Give header-less citation text an `@article{` header.
///
/// Text that still carries its key and closing brace (more `}` than `{`)
/// only needs the prefix; bare field lists also get a key and a closing brace.
pub fn repair_bibtex(raw: &str) -> String {
    let text = raw.trim();
    if text.starts_with('@') {
        return text.to_string();
    }

    let opens = text.matches('{').count();
    let closes = text.matches('}').count();
    if closes > opens {
        format!("@article{{{}", text)
    } else {
        format!("@article{{recovered,\n{}\n}}", text.trim_end_matches(','))
    }
}

/// Parse citation text with the BibTeX parser.
///
/// Returns `None` when nothing could be parsed. On success the URL is
/// derived from the DOI when the entry has none, otherwise from an arXiv
/// eprint when one is present.
pub fn parse_structured(raw: &str) -> Option<ExtractedFields> {
    if raw.trim().is_empty() {
        return None;
    }

    let source = repair_bibtex(raw);
    let bibliography = match Bibliography::parse(&source) {
        Ok(bib) => bib,
        Err(e) => {
            debug!(error = %e, "BibTeX parse failed");
            return None;
        }
    };
    let entry = bibliography.into_iter().next()?;

    let mut fields = ExtractedFields {
        title: field(&entry, "title"),
        authors: entry_authors(&entry),
        year: field(&entry, "year"),
        venue: first_field(&entry, &["journal", "journaltitle", "booktitle", "publisher"]),
        abstract_text: field(&entry, "abstract"),
        url: field(&entry, "url"),
        doi: field(&entry, "doi"),
        ..Default::default()
    };
    if fields.year.is_empty() {
        fields.year = field(&entry, "date").chars().take(4).collect();
    }

    let eprint = field(&entry, "eprint");
    if !fields.doi.is_empty() && fields.url.is_empty() {
        fields.url = doi_url(&fields.doi);
    } else if !eprint.is_empty() {
        fields.url = arxiv_url(&eprint);
    }
    fields.arxiv_id = eprint;

    if fields.is_empty() {
        None
    } else {
        Some(fields)
    }
}

/// Flatten a field's chunks into plain text.
fn chunks_to_string(chunks: &[Spanned<Chunk>]) -> String {
    let text: String = chunks
        .iter()
        .map(|spanned| match &spanned.v {
            Chunk::Normal(s) | Chunk::Verbatim(s) | Chunk::Math(s) => s.as_str(),
        })
        .collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn field(entry: &Entry, name: &str) -> String {
    entry
        .fields
        .get(name)
        .map(|chunks| chunks_to_string(chunks))
        .unwrap_or_default()
}

fn first_field(entry: &Entry, names: &[&str]) -> String {
    names
        .iter()
        .map(|name| field(entry, name))
        .find(|value| !value.is_empty())
        .unwrap_or_default()
}

fn entry_authors(entry: &Entry) -> Vec<String> {
    match entry.author() {
        Ok(people) => people
            .iter()
            .map(|person| {
                if person.given_name.is_empty() {
                    person.name.clone()
                } else {
                    format!("{} {}", person.given_name, person.name)
                }
            })
            .filter(|name| !name.trim().is_empty())
            .collect(),
        Err(_) => split_authors(&field(entry, "author")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHOLAR_BIB: &str = "@article{lewis2020retrieval,\n  title={Retrieval-augmented generation for knowledge-intensive nlp tasks},\n  author={Lewis, Patrick and Perez, Ethan and Piktus, Aleksandra},\n  journal={Advances in Neural Information Processing Systems},\n  volume={33},\n  pages={9459--9474},\n  year={2020}\n}";

    #[test]
    fn test_scholar_bibtex_fields() {
        let fields = parse_scholar_bibtex(SCHOLAR_BIB);
        assert_eq!(
            fields.title,
            "Retrieval-augmented generation for knowledge-intensive nlp tasks"
        );
        assert_eq!(
            fields.authors,
            vec!["Lewis, Patrick", "Perez, Ethan", "Piktus, Aleksandra"]
        );
        assert_eq!(fields.year, "2020");
        assert_eq!(fields.venue, "Advances in Neural Information Processing Systems");
        assert!(fields.url.is_empty());
        assert!(fields.doi.is_empty());
    }

    #[test]
    fn test_scholar_bibtex_requires_header() {
        let fields = parse_scholar_bibtex("title={Something}, year={2020}");
        assert!(fields.is_empty());
    }

    #[test]
    fn test_scholar_bibtex_arxiv_wins_over_doi() {
        let bib = "@article{x,\n  title={T},\n  doi={10.1/abc},\n  journal={arXiv preprint arXiv:2501.09136}\n}";
        let fields = parse_scholar_bibtex(bib);
        assert_eq!(fields.doi, "10.1/abc");
        assert_eq!(fields.arxiv_id, "2501.09136");
        assert_eq!(fields.url, "https://arxiv.org/abs/2501.09136");
    }

    #[test]
    fn test_scholar_bibtex_doi_url() {
        let bib = "@article{x,\n  title={T},\n  doi={10.1145/3442188.3445922}\n}";
        let fields = parse_scholar_bibtex(bib);
        assert_eq!(fields.url, "https://doi.org/10.1145/3442188.3445922");
    }

    #[test]
    fn test_structured_doi_url_when_url_missing() {
        let bib = "@article{smith2024,\n  title = {Agentic RAG in Practice},\n  author = {Smith, Jane and Doe, John},\n  year = {2024},\n  doi = {10.1234/agentic.5678}\n}";
        let fields = parse_structured(bib).expect("should parse");
        assert_eq!(fields.title, "Agentic RAG in Practice");
        assert_eq!(fields.authors, vec!["Jane Smith", "John Doe"]);
        assert_eq!(fields.year, "2024");
        assert_eq!(fields.url, "https://doi.org/10.1234/agentic.5678");
        assert!(fields.abstract_text.is_empty());
    }

    #[test]
    fn test_structured_eprint_url_without_doi() {
        for id in ["2312.10997", "1706.03762"] {
            let bib = format!(
                "@misc{{k,\n  title = {{Some Paper}},\n  eprint = {{{}}},\n  archivePrefix = {{arXiv}}\n}}",
                id
            );
            let fields = parse_structured(&bib).expect("should parse");
            assert_eq!(fields.url, format!("https://arxiv.org/abs/{}", id));
            assert_eq!(fields.arxiv_id, id);
        }
    }

    #[test]
    fn test_structured_keeps_existing_url() {
        let bib = "@article{k,\n  title = {T},\n  doi = {10.1/x},\n  url = {https://example.org/paper}\n}";
        let fields = parse_structured(bib).expect("should parse");
        assert_eq!(fields.url, "https://example.org/paper");
    }

    #[test]
    fn test_repair_adds_header() {
        let repaired = repair_bibtex("title = {Lost Header},\n  year = {2021}");
        assert!(repaired.starts_with("@article{recovered,"));

        let fields = parse_structured("title = {Lost Header},\n  year = {2021}").expect("should parse");
        assert_eq!(fields.title, "Lost Header");
        assert_eq!(fields.year, "2021");
    }

    #[test]
    fn test_repair_keyed_body() {
        let repaired = repair_bibtex("doe2019,\n  title={Keyed Body},\n  year={2019}\n}");
        assert!(repaired.starts_with("@article{doe2019,"));

        let fields = parse_structured("doe2019,\n  title={Keyed Body},\n  year={2019}\n}")
            .expect("should parse");
        assert_eq!(fields.title, "Keyed Body");
    }

    #[test]
    fn test_structured_rejects_free_text() {
        assert!(parse_structured("").is_none());
        assert!(parse_structured("Smith J. (2020). A paper about things. Journal of Stuff.").is_none());
    }
}
