//! Generation boundary and the guarded-generation procedure
//!
//! Every AI-backed step in the pipeline goes through one code path:
//! sanitize inputs, call the generator under a bounded timeout, safety-check
//! the output, then validate its structure. Any failure surfaces as
//! `GenerationUnavailable` so the caller substitutes its deterministic
//! fallback. One attempt, no retries; the fallback is the retry policy.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info};

use crate::error::{CoachError, Result};
use crate::safety::SafetyGuard;

/// Bound on external generation latency. Timeout is treated identically to
/// a generation error.
pub const GENERATION_TIMEOUT: Duration = Duration::from_secs(30);

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Opaque generation capability: prompt in, text out, may fail.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String>;
}

//
// ================= Claude Client =================
//

/// Reusable Claude client (connection-pooled)
pub struct ClaudeClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl ClaudeClient {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url: "https://api.anthropic.com/v1/messages".to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn from_env() -> Self {
        let api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();
        Self::new(api_key)
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: String,
}

#[async_trait]
impl TextGenerator for ClaudeClient {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(CoachError::GenerationUnavailable(
                "ANTHROPIC_API_KEY not configured".to_string(),
            ));
        }

        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        info!("Calling Claude API");

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Claude API request failed: {}", e);
                CoachError::GenerationUnavailable(format!("Claude API error: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Claude API error response: {}", error_text);
            return Err(CoachError::GenerationUnavailable(format!(
                "Claude API error: {}",
                error_text
            )));
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Claude response: {}", e);
            CoachError::GenerationUnavailable(format!("Claude parse error: {}", e))
        })?;

        let text = parsed
            .content
            .first()
            .map(|block| block.text.clone())
            .ok_or_else(|| {
                CoachError::GenerationUnavailable("Empty response from Claude".to_string())
            })?;

        Ok(text)
    }
}

//
// ================= Guarded Generation =================

/// One guarded generation round: safety footer, bounded call, output safety
/// scan, structured validation. Returns the parsed JSON object or
/// `GenerationUnavailable`; callers own the fallback.
pub async fn guarded_generate(
    generator: &dyn TextGenerator,
    service: &str,
    prompt: &str,
    max_tokens: u32,
    required_fields: &[&str],
) -> Result<Value> {
    let safe_prompt = SafetyGuard::add_safety_context(prompt);

    let outcome = tokio::time::timeout(
        GENERATION_TIMEOUT,
        generator.generate(&safe_prompt, max_tokens),
    )
    .await;

    let text = match outcome {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            SafetyGuard::log_interaction(service, prompt, &e.to_string(), false);
            return Err(CoachError::GenerationUnavailable(e.to_string()));
        }
        Err(_) => {
            SafetyGuard::log_interaction(service, prompt, "timeout", false);
            return Err(CoachError::GenerationUnavailable(format!(
                "generation timed out after {:?}",
                GENERATION_TIMEOUT
            )));
        }
    };

    if let Err(reason) = SafetyGuard::check_output_safety(&text) {
        SafetyGuard::log_interaction(service, prompt, &reason, false);
        return Err(CoachError::GenerationUnavailable(reason));
    }

    match SafetyGuard::validate_structured_output(&text, required_fields) {
        Ok(parsed) => {
            SafetyGuard::log_interaction(service, prompt, &text, true);
            Ok(parsed)
        }
        Err(reason) => {
            SafetyGuard::log_interaction(service, prompt, &reason, false);
            Err(CoachError::GenerationUnavailable(reason))
        }
    }
}

//
// ================= Mock Generator =================

/// Fixed-response generator for development and testing. Keeps the system
/// exercisable without an API key.
pub struct StaticGenerator {
    response: std::result::Result<String, String>,
}

impl StaticGenerator {
    pub fn replying(text: &str) -> Self {
        Self {
            response: Ok(text.to_string()),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            response: Err(reason.to_string()),
        }
    }
}

#[async_trait]
impl TextGenerator for StaticGenerator {
    async fn generate(&self, _prompt: &str, _max_tokens: u32) -> Result<String> {
        match &self.response {
            Ok(text) => Ok(text.clone()),
            Err(reason) => Err(CoachError::GenerationUnavailable(reason.clone())),
        }
    }
}
