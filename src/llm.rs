//! Text-generation client
//!
//! One `ChatClient` speaks to every supported provider. DeepSeek and the
//! Hugging Face router share the OpenAI chat-completions wire format; Claude
//! uses the Anthropic messages API. Provider defaults (endpoint, model) come
//! from `ProviderConfig`, not from separate client implementations.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// ---------------------------------------------------------------------------
/// Configuration
/// ---------------------------------------------------------------------------

const DEEPSEEK_API_URL: &str = "https://api.deepseek.com/chat/completions";
const DEEPSEEK_MODEL: &str = "deepseek-chat";
const HF_ROUTER_URL: &str = "https://router.huggingface.co/v1/chat/completions";
const HF_MODEL: &str = "deepseek-ai/DeepSeek-R1:cheapest";
const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";
const CLAUDE_MODEL: &str = "claude-sonnet-4-20250514";
const API_VERSION: &str = "2023-06-01";

const DEFAULT_TEMPERATURE: f32 = 0.4;
const DEFAULT_TOP_P: f32 = 0.9;
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
  DeepSeek,
  HuggingFace,
  Anthropic,
}

impl Provider {
  pub fn default_endpoint(&self) -> &'static str {
    match self {
      Self::DeepSeek => DEEPSEEK_API_URL,
      Self::HuggingFace => HF_ROUTER_URL,
      Self::Anthropic => CLAUDE_API_URL,
    }
  }

  pub fn default_model(&self) -> &'static str {
    match self {
      Self::DeepSeek => DEEPSEEK_MODEL,
      Self::HuggingFace => HF_MODEL,
      Self::Anthropic => CLAUDE_MODEL,
    }
  }
}

impl std::fmt::Display for Provider {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::DeepSeek => write!(f, "deepseek"),
      Self::HuggingFace => write!(f, "huggingface"),
      Self::Anthropic => write!(f, "anthropic"),
    }
  }
}

impl std::str::FromStr for Provider {
  type Err = String;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "deepseek" => Ok(Self::DeepSeek),
      "huggingface" | "hf" => Ok(Self::HuggingFace),
      "anthropic" | "claude" => Ok(Self::Anthropic),
      _ => Err(format!("Unknown LLM provider: {}", s)),
    }
  }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
  pub provider: Provider,
  pub api_key: String,
  pub model: String,
  pub endpoint: String,
  pub temperature: f32,
  pub top_p: f32,
  pub timeout: Duration,
}

impl ProviderConfig {
  /// Provider defaults for everything except the key
  pub fn new(provider: Provider, api_key: impl Into<String>) -> Self {
    Self {
      provider,
      api_key: api_key.into(),
      model: provider.default_model().to_string(),
      endpoint: provider.default_endpoint().to_string(),
      temperature: DEFAULT_TEMPERATURE,
      top_p: DEFAULT_TOP_P,
      timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
    }
  }

  pub fn with_model(mut self, model: impl Into<String>) -> Self {
    self.model = model.into();
    self
  }

  pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
    self.endpoint = endpoint.into();
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }
}

/// ---------------------------------------------------------------------------
/// Error Types
/// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum LlmError {
  #[error("API key not configured")]
  MissingApiKey,

  #[error("Request failed: {0}")]
  Request(String),

  #[error("Request timed out")]
  Timeout,

  #[error("API error: {0}")]
  Api(String),

  #[error("Parse error: {0}")]
  Parse(String),
}

impl From<reqwest::Error> for LlmError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      LlmError::Timeout
    } else {
      LlmError::Request(e.to_string())
    }
  }
}

/// ---------------------------------------------------------------------------
/// Generation Capability
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
  Stop,
  /// Output hit the token ceiling
  Length,
  Other(String),
}

impl FinishReason {
  /// Map a provider's raw finish/stop reason
  pub fn from_raw(raw: Option<&str>) -> Self {
    match raw.map(str::trim) {
      None | Some("") => Self::Other(String::new()),
      Some(r) if r.eq_ignore_ascii_case("length") || r.eq_ignore_ascii_case("max_tokens") => {
        Self::Length
      }
      Some(r) if r.eq_ignore_ascii_case("stop") || r.eq_ignore_ascii_case("end_turn") => Self::Stop,
      Some(r) => Self::Other(r.to_string()),
    }
  }

  pub fn is_length(&self) -> bool {
    matches!(self, Self::Length)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
  pub text: String,
  pub finish: FinishReason,
}

/// Anything that can turn a system and user prompt into text
#[async_trait]
pub trait TextGenerator: Send + Sync {
  async fn generate(
    &self,
    system: &str,
    user: &str,
    max_tokens: u32,
  ) -> Result<Generation, LlmError>;
}

/// ---------------------------------------------------------------------------
/// OpenAI-Compatible Wire Types
/// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
  model: &'a str,
  messages: Vec<ChatMessage<'a>>,
  max_tokens: u32,
  temperature: f32,
  top_p: f32,
  stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
  role: &'a str,
  content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
  #[serde(default)]
  choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
  message: ChatChoiceMessage,
  finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
  #[serde(default)]
  content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatErrorResponse {
  error: ChatErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ChatErrorDetail {
  message: String,
}

/// ---------------------------------------------------------------------------
/// Claude API Types
/// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ClaudeRequest<'a> {
  model: &'a str,
  max_tokens: u32,
  system: &'a str,
  messages: Vec<ChatMessage<'a>>,
  temperature: f32,
  top_p: f32,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
  content: Vec<ContentBlock>,
  stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
  #[serde(rename = "type")]
  content_type: String,
  text: Option<String>,
}

/// ---------------------------------------------------------------------------
/// Chat Client
/// ---------------------------------------------------------------------------

pub struct ChatClient {
  client: Client,
  config: ProviderConfig,
}

impl ChatClient {
  pub fn new(config: ProviderConfig) -> Result<Self, LlmError> {
    if config.api_key.trim().is_empty() {
      return Err(LlmError::MissingApiKey);
    }
    url::Url::parse(&config.endpoint)
      .map_err(|e| LlmError::Request(format!("Invalid endpoint {}: {}", config.endpoint, e)))?;

    let client = Client::builder()
      .timeout(config.timeout)
      .build()
      .map_err(|e| LlmError::Request(e.to_string()))?;

    Ok(Self { client, config })
  }

  pub fn config(&self) -> &ProviderConfig {
    &self.config
  }

  async fn post_json<T: Serialize>(
    &self,
    request: reqwest::RequestBuilder,
    body: &T,
  ) -> Result<String, LlmError> {
    let response = request
      .header("content-type", "application/json")
      .json(body)
      .send()
      .await?;

    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
      // Both wire formats wrap errors as {"error": {"message": ...}}
      if let Ok(error_resp) = serde_json::from_str::<ChatErrorResponse>(&body) {
        return Err(LlmError::Api(error_resp.error.message));
      }
      return Err(LlmError::Api(format!("HTTP {}: {}", status, body)));
    }

    Ok(body)
  }

  async fn complete_openai(
    &self,
    system: &str,
    user: &str,
    max_tokens: u32,
  ) -> Result<Generation, LlmError> {
    let request = ChatRequest {
      model: &self.config.model,
      messages: vec![
        ChatMessage {
          role: "system",
          content: system,
        },
        ChatMessage {
          role: "user",
          content: user,
        },
      ],
      max_tokens,
      temperature: self.config.temperature,
      top_p: self.config.top_p,
      stream: false,
    };

    let builder = self
      .client
      .post(&self.config.endpoint)
      .bearer_auth(&self.config.api_key);
    let body = self.post_json(builder, &request).await?;

    let response: ChatResponse =
      serde_json::from_str(&body).map_err(|e| LlmError::Parse(e.to_string()))?;
    let choice = response
      .choices
      .into_iter()
      .next()
      .ok_or_else(|| LlmError::Parse("No choices in response".to_string()))?;

    Ok(Generation {
      text: choice.message.content.unwrap_or_default().trim().to_string(),
      finish: FinishReason::from_raw(choice.finish_reason.as_deref()),
    })
  }

  async fn complete_claude(
    &self,
    system: &str,
    user: &str,
    max_tokens: u32,
  ) -> Result<Generation, LlmError> {
    let request = ClaudeRequest {
      model: &self.config.model,
      max_tokens,
      system,
      messages: vec![ChatMessage {
        role: "user",
        content: user,
      }],
      temperature: self.config.temperature,
      top_p: self.config.top_p,
    };

    let builder = self
      .client
      .post(&self.config.endpoint)
      .header("x-api-key", &self.config.api_key)
      .header("anthropic-version", API_VERSION);
    let body = self.post_json(builder, &request).await?;

    let claude_response: ClaudeResponse =
      serde_json::from_str(&body).map_err(|e| LlmError::Parse(e.to_string()))?;

    // Concatenate all text blocks
    let text = claude_response
      .content
      .iter()
      .filter(|c| c.content_type == "text")
      .filter_map(|c| c.text.as_deref())
      .collect::<Vec<_>>()
      .join("\n");

    Ok(Generation {
      text: text.trim().to_string(),
      finish: FinishReason::from_raw(claude_response.stop_reason.as_deref()),
    })
  }
}

#[async_trait]
impl TextGenerator for ChatClient {
  async fn generate(
    &self,
    system: &str,
    user: &str,
    max_tokens: u32,
  ) -> Result<Generation, LlmError> {
    tracing::debug!(
      target: "wellness::llm",
      provider = %self.config.provider,
      model = %self.config.model,
      max_tokens,
      "sending generation request"
    );

    let result = match self.config.provider {
      Provider::DeepSeek | Provider::HuggingFace => {
        self.complete_openai(system, user, max_tokens).await
      }
      Provider::Anthropic => self.complete_claude(system, user, max_tokens).await,
    };

    match &result {
      Ok(generation) => tracing::debug!(
        target: "wellness::llm",
        chars = generation.text.len(),
        finish = ?generation.finish,
        "generation received"
      ),
      Err(e) => tracing::warn!(target: "wellness::llm", error = %e, "generation failed"),
    }
    result
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
