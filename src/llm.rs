//! Response generator backends.
//!
//! The rest of the crate treats the language model as an oracle behind
//! [`ResponseGenerator`]: a prompt goes in, text or a [`GenerationError`]
//! comes out. Two HTTP backends are provided:
//!
//! - [`OllamaGenerator`] talks to a local Ollama daemon and makes sure the
//!   configured model is present (pulling it if needed) before generating.
//! - [`ChatCompletionsGenerator`] talks to any OpenAI-compatible
//!   `/chat/completions` endpoint.
//!
//! Both are rate limited to `calls_per_second`.

use crate::config::{LlmBackend, LlmConfig};
use crate::error::{GenerationError, LitscoutError, Result};
use crate::prompts::SYSTEM_PROMPT;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Health check timeout
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Model pull timeout (downloads can be large)
const PULL_TIMEOUT: Duration = Duration::from_secs(300);

/// Generation request timeout
const GENERATE_TIMEOUT: Duration = Duration::from_secs(120);

/// Outcome of a generation call.
pub type GenerationResult = std::result::Result<String, GenerationError>;

/// A text-in, text-out language model.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> GenerationResult;
}

/// Build the backend selected in config.
pub fn build_generator(
    config: &LlmConfig,
    retry: RetryPolicy,
) -> Result<Arc<dyn ResponseGenerator>> {
    let generator: Arc<dyn ResponseGenerator> = match config.backend {
        LlmBackend::Ollama => Arc::new(OllamaGenerator::new(config, retry)?),
        LlmBackend::OpenAi => Arc::new(ChatCompletionsGenerator::new(config)?),
    };
    info!(backend = ?config.backend, model = %config.model, "Response generator ready");
    Ok(generator)
}

fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .build()
        .map_err(|e| LitscoutError::Config(format!("Failed to build HTTP client: {}", e)))
}

fn transport(e: reqwest::Error) -> GenerationError {
    GenerationError::Transport(e.to_string())
}

/// Spaces calls at least `1 / calls_per_second` apart.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(calls_per_second: f64) -> Self {
        let min_interval = if calls_per_second > 0.0 {
            Duration::try_from_secs_f64(1.0 / calls_per_second).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        };
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Wait until the next call is allowed, then claim the slot.
    pub async fn wait(&self) {
        let remaining = {
            let last = self.last_call.lock().ok().and_then(|l| *l);
            last.map(|t| self.min_interval.saturating_sub(t.elapsed()))
        };

        if let Some(remaining) = remaining.filter(|r| !r.is_zero()) {
            debug!(wait_ms = remaining.as_millis() as u64, "Rate limiting model call");
            tokio::time::sleep(remaining).await;
        }

        if let Ok(mut last) = self.last_call.lock() {
            *last = Some(Instant::now());
        }
    }
}

/// Model name without its `:tag` suffix.
fn base_name(model: &str) -> &str {
    model.split(':').next().unwrap_or(model)
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Local Ollama daemon.
pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    limiter: RateLimiter,
    retry: RetryPolicy,
    model_ready: AtomicBool,
}

impl OllamaGenerator {
    pub fn new(config: &LlmConfig, retry: RetryPolicy) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            limiter: RateLimiter::new(config.calls_per_second),
            retry,
            model_ready: AtomicBool::new(false),
        })
    }

    /// Whether the daemon answers its root endpoint.
    pub async fn check_service(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(url = %self.base_url, error = %e, "LLM service check failed");
                false
            }
        }
    }

    /// Names of locally available models.
    pub async fn list_models(&self) -> std::result::Result<Vec<String>, GenerationError> {
        let resp = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(transport)?;

        if !resp.status().is_success() {
            return Err(GenerationError::Api {
                code: resp.status().as_u16(),
                message: "failed to list models".to_string(),
            });
        }

        let tags: TagsResponse = resp.json().await.map_err(transport)?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn pull_model(&self) -> std::result::Result<(), GenerationError> {
        info!(model = %self.model, "Pulling model");
        let resp = self
            .client
            .post(format!("{}/api/pull", self.base_url))
            .timeout(PULL_TIMEOUT)
            .json(&serde_json::json!({ "name": self.model, "stream": false }))
            .send()
            .await
            .map_err(transport)?;

        if !resp.status().is_success() {
            let code = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Api { code, message });
        }
        Ok(())
    }

    async fn load_once(&self) -> std::result::Result<(), GenerationError> {
        let available = self.list_models().await?;
        let wanted = base_name(&self.model);
        if available.iter().any(|name| base_name(name) == wanted) {
            debug!(model = %self.model, "Model available");
            return Ok(());
        }

        warn!(model = %self.model, "Model not found locally");
        self.pull_model().await
    }

    /// Make sure the configured model is present, pulling it if missing.
    pub async fn ensure_model_loaded(&self) -> std::result::Result<(), GenerationError> {
        if self.model_ready.load(Ordering::Relaxed) {
            return Ok(());
        }

        let result = self
            .retry
            .run("model_load", |_| self.load_once(), |_| true, |_| {})
            .await;

        match result {
            Ok(()) => {
                self.model_ready.store(true, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                let attempts = e.attempts();
                error!(model = %self.model, attempts, error = %e.into_inner(), "Failed to load model");
                Err(GenerationError::ModelUnavailable(self.model.clone()))
            }
        }
    }
}

#[async_trait]
impl ResponseGenerator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> GenerationResult {
        self.limiter.wait().await;

        if !self.check_service().await {
            let err = GenerationError::ServiceUnavailable(self.base_url.clone());
            error!(error = %err, "Generation skipped");
            return Err(err);
        }
        self.ensure_model_loaded().await?;

        debug!(model = %self.model, prompt_chars = prompt.len(), "Generating response");
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "num_predict": self.max_tokens,
                "temperature": self.temperature,
            }
        });

        let resp = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(GENERATE_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        if !resp.status().is_success() {
            let code = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Api { code, message });
        }

        let data: GenerateResponse = resp.json().await.map_err(transport)?;
        Ok(data.response)
    }
}

/// OpenAI-compatible API response structures
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// Any `/chat/completions` endpoint.
pub struct ChatCompletionsGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    limiter: RateLimiter,
}

impl ChatCompletionsGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            limiter: RateLimiter::new(config.calls_per_second),
        })
    }
}

#[async_trait]
impl ResponseGenerator for ChatCompletionsGenerator {
    async fn generate(&self, prompt: &str) -> GenerationResult {
        self.limiter.wait().await;

        let request_body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt}
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(GENERATE_TIMEOUT)
            .json(&request_body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                GenerationError::ServiceUnavailable(self.base_url.clone())
            } else {
                transport(e)
            }
        })?;

        if !response.status().is_success() {
            let code = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api { code, message });
        }

        let api_response: ChatCompletionResponse = response.json().await.map_err(transport)?;
        if let Some(usage) = &api_response.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Chat completion usage"
            );
        }

        Ok(api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default())
    }
}

/// Pull a JSON object out of model output (handles markdown code fences and
/// surrounding chatter).
pub fn extract_json(content: &str) -> String {
    let trimmed = content.trim();

    if trimmed.starts_with("```") {
        let lines: Vec<&str> = trimmed.lines().collect();
        if lines.len() >= 2 {
            let end = if lines.last().map(|l| l.trim()) == Some("```") {
                lines.len() - 1
            } else {
                lines.len()
            };
            return lines[1..end].join("\n");
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return trimmed[start..=end].to_string();
        }
    }

    trimmed.to_string()
}

/// Generator with canned behaviour that records every prompt it sees.
#[cfg(test)]
pub struct FakeGenerator {
    reply: Box<dyn Fn(&str) -> GenerationResult + Send + Sync>,
    prompts: Mutex<Vec<String>>,
}

#[cfg(test)]
impl FakeGenerator {
    pub fn new(reply: impl Fn(&str) -> GenerationResult + Send + Sync + 'static) -> Self {
        Self {
            reply: Box::new(reply),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    pub fn failing(err: GenerationError) -> Self {
        Self::new(move |_| Err(err.clone()))
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.prompts().len()
    }
}

#[cfg(test)]
#[async_trait]
impl ResponseGenerator for FakeGenerator {
    async fn generate(&self, prompt: &str) -> GenerationResult {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        (self.reply)(prompt)
    }
}
