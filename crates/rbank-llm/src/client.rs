//! Blocking client for an OpenAI-compatible chat-completion endpoint
//! (`llama-server`, vLLM, Ollama's `/v1` shim, ...).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use rbank_core::{RbankError, RbankResult};

/// How much of an error body to keep in messages.
const ERROR_BODY_PREVIEW: usize = 300;

/// One completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub seed: Option<u64>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            max_tokens: 16384,
            temperature: 0.6,
            seed: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }
}

pub trait CompletionClient {
    fn generate(&self, request: &CompletionRequest) -> RbankResult<String>;

    /// Model name reported in logs and result files.
    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1".into(),
            model: "qwen3-1.7b".into(),
            api_key: None,
            timeout: Duration::from_secs(600),
        }
    }
}

pub struct LlamaServerClient {
    agent: ureq::Agent,
    settings: LlmSettings,
}

impl LlamaServerClient {
    pub fn new(settings: LlmSettings) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(settings.timeout).build();
        Self { agent, settings }
    }

    pub fn endpoint(&self) -> String {
        chat_url(&self.settings.base_url)
    }
}

impl CompletionClient for LlamaServerClient {
    fn generate(&self, request: &CompletionRequest) -> RbankResult<String> {
        let body = ChatRequest::from_request(&self.settings.model, request);
        let url = self.endpoint();
        debug!(%url, max_tokens = request.max_tokens, "chat completion request");

        let mut req = self.agent.post(&url).set("Content-Type", "application/json");
        if let Some(key) = &self.settings.api_key {
            req = req.set("Authorization", &format!("Bearer {key}"));
        }

        let response = match req.send_json(&body) {
            Ok(resp) => resp,
            Err(ureq::Error::Status(code, resp)) => {
                let text = resp.into_string().unwrap_or_default();
                return Err(RbankError::Llm(format!(
                    "server returned {code}: {}",
                    preview(&text)
                )));
            }
            Err(e) => return Err(RbankError::Llm(format!("request to {url} failed: {e}"))),
        };

        let text = response
            .into_string()
            .map_err(|e| RbankError::Llm(format!("cannot read response body: {e}")))?;
        parse_chat_response(&text)
    }

    fn model_name(&self) -> &str {
        &self.settings.model
    }
}

fn chat_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

fn preview(text: &str) -> String {
    text.chars().take(ERROR_BODY_PREVIEW).collect()
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> ChatRequest<'a> {
    fn from_request(model: &'a str, request: &'a CompletionRequest) -> Self {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });
        Self {
            model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            seed: request.seed,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

fn parse_chat_response(body: &str) -> RbankResult<String> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| RbankError::Llm(format!("malformed completion response: {e}: {}", preview(body))))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| RbankError::Llm("completion response has no message content".into()))
}
