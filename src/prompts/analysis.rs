//! Per-article analysis prompts.

/// Article analysis.
/// Placeholders: {title}, {abstract}
pub const ANALYSIS_TEMPLATE: &str = r#"Analyze this research article and give a detailed breakdown.

Title: {title}
Abstract: {abstract}

Cover:
1. Main research contributions
2. Key findings
3. Methodology used
4. Potential applications
5. Key topics/keywords"#;

/// Keyword extraction from an analysis.
/// Placeholders: {analysis}
pub const KEYWORDS_TEMPLATE: &str = r#"Based on the analysis below, extract 5-7 keywords that best describe this paper.
Output only the keywords as a comma-separated list.

Analysis:
{analysis}"#;

/// Build the analysis prompt. An empty abstract is spelled out.
pub fn build_analysis_prompt(title: &str, abstract_text: &str) -> String {
    let abstract_text = if abstract_text.trim().is_empty() {
        "No abstract available"
    } else {
        abstract_text
    };
    ANALYSIS_TEMPLATE
        .replace("{title}", title)
        .replace("{abstract}", abstract_text)
}

/// Build the keyword extraction prompt.
pub fn build_keywords_prompt(analysis: &str) -> String {
    KEYWORDS_TEMPLATE.replace("{analysis}", analysis)
}
