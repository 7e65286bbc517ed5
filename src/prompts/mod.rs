//! Prompt templates for the response generator.
//!
//! Templates are plain strings with `{placeholder}` slots; each has a
//! matching `build_*` function that fills them in.

pub mod analysis;
pub mod extraction;

pub use analysis::*;
pub use extraction::*;

/// System prompt for chat-style backends.
pub const SYSTEM_PROMPT: &str = "You are a research assistant working with academic literature. \
Answer only with the requested content. Do not add greetings, explanations or markdown.";
