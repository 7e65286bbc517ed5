//! Custom error types for litscout.
//!
//! Every fallible library function returns `Result<T, LitscoutError>`.
//! Response generation has its own [`GenerationError`] so callers branch on
//! the failure kind instead of inspecting generated text.

use thiserror::Error;

/// Substrings that identify a bot-detection challenge in error text.
const BOT_DETECTION_MARKERS: &[&str] = &["captcha", "unusual traffic"];

/// Main error type for litscout operations.
#[derive(Debug, Error)]
pub enum LitscoutError {
    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// HTML, XML or citation parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Rate limited by external API
    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    /// External API returned an error
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status or service error code
        code: i32,
        /// Error message from API
        message: String,
    },

    /// The primary source answered with a CAPTCHA / automated-traffic page
    #[error("CAPTCHA detected, the search source is blocking automated access")]
    BotDetected,

    /// The initial search query could not be executed
    #[error("Search unavailable after {attempts} attempts: {reason}")]
    SearchUnavailable {
        /// Attempts performed before giving up
        attempts: u32,
        /// Rendered text of the last failure
        reason: String,
    },

    /// Response generator failure
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Config file could not be parsed
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl LitscoutError {
    /// Whether this failure means the source blocked automated access.
    ///
    /// Matches the typed variant, and falls back to a case-insensitive
    /// substring check so wrapped transport errors are recognised too.
    pub fn is_bot_detection(&self) -> bool {
        match self {
            Self::BotDetected => true,
            Self::SearchUnavailable { reason, .. } => mentions_bot_detection(reason),
            other => mentions_bot_detection(&other.to_string()),
        }
    }
}

/// Case-insensitive check for bot-detection markers in free text.
pub fn mentions_bot_detection(text: &str) -> bool {
    let lower = text.to_lowercase();
    BOT_DETECTION_MARKERS.iter().any(|m| lower.contains(m))
}

/// Failure of the response generator.
///
/// The `Display` text is meant to be shown to users as-is.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    /// The model backend did not answer the health check
    #[error("Error: LLM service is not running at {0}. Please start it first.")]
    ServiceUnavailable(String),

    /// The configured model is missing and could not be pulled
    #[error("Error: Failed to load model {0}")]
    ModelUnavailable(String),

    /// The backend answered with a non-success status
    #[error("Error generating response: API error {code}: {message}")]
    Api {
        /// HTTP status code
        code: u16,
        /// Body or status text
        message: String,
    },

    /// Transport or decoding failure
    #[error("Error generating response: {0}")]
    Transport(String),
}

/// Result type alias using `LitscoutError`
pub type Result<T> = std::result::Result<T, LitscoutError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bot_detection_variant() {
        assert!(LitscoutError::BotDetected.is_bot_detection());
    }

    #[test]
    fn test_bot_detection_by_text() {
        let err = LitscoutError::Api {
            code: 403,
            message: "Our systems have detected Unusual Traffic".to_string(),
        };
        assert!(err.is_bot_detection());

        let err = LitscoutError::Parse("Got a CAPTCHA page".to_string());
        assert!(err.is_bot_detection());
    }

    #[test]
    fn test_plain_errors_are_not_bot_detection() {
        assert!(!LitscoutError::RateLimited(5).is_bot_detection());
        assert!(!LitscoutError::Parse("no results".to_string()).is_bot_detection());
    }

    #[test]
    fn test_generation_error_is_descriptive() {
        let err = GenerationError::ModelUnavailable("llama3".to_string());
        assert_eq!(err.to_string(), "Error: Failed to load model llama3");
    }
}
