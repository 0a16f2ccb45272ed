//! LLM port
//!
//! Two reasoning tiers behind one trait: `fast` classifies cheaply, `smart`
//! composes. The bundled adapter speaks the OpenAI-compatible chat
//! completions dialect (OpenRouter, Ollama, local servers).

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{header::CONTENT_TYPE, Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

use crate::error::{Result, VigilError};

/// Reasoning tier requested by cognition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmRole {
    Fast,
    Smart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Tool definition exposed to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
}

/// A completion request
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub messages: Vec<ChatMessage>,
    pub role: LlmRole,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub response_format: Option<ResponseFormat>,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: Option<ToolChoice>,
}

impl LlmRequest {
    pub fn new(role: LlmRole, messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            role,
            max_tokens: None,
            temperature: None,
            response_format: None,
            tools: Vec::new(),
            tool_choice: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_json(mut self) -> Self {
        self.response_format = Some(ResponseFormat::JsonObject);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    Other,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub finish_reason: FinishReason,
    pub tool_calls: Vec<LlmToolCall>,
}

#[async_trait]
pub trait Llm: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse>;
}

/// Adapter configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    /// Loaded from the environment, never from the config file
    #[serde(skip)]
    pub api_key: Option<String>,
    pub fast_model: String,
    pub smart_model: String,
    pub timeout_secs: u64,
    pub default_max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: None,
            fast_model: "openai/gpt-4o-mini".to_string(),
            smart_model: "anthropic/claude-sonnet-4".to_string(),
            timeout_secs: 60,
            default_max_tokens: 1024,
        }
    }
}

impl LlmConfig {
    pub fn model_for(&self, role: LlmRole) -> &str {
        match role {
            LlmRole::Fast => &self.fast_model,
            LlmRole::Smart => &self.smart_model,
        }
    }
}

// Wire types for the OpenAI-compatible dialect

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a str>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct WireResponse {
    model: Option<String>,
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// OpenAI-compatible HTTP adapter
pub struct HttpLlmClient {
    config: LlmConfig,
    http: HttpClient,
}

impl HttpLlmClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("vigil/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| VigilError::Internal {
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { config, http })
    }

    fn wire_request<'a>(&'a self, request: &'a LlmRequest) -> WireRequest<'a> {
        WireRequest {
            model: self.config.model_for(request.role),
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: match m.role {
                        ChatRole::System => "system",
                        ChatRole::User => "user",
                        ChatRole::Assistant => "assistant",
                        ChatRole::Tool => "tool",
                    },
                    content: m.content.clone(),
                })
                .collect(),
            max_tokens: request.max_tokens.or(Some(self.config.default_max_tokens)),
            temperature: request.temperature,
            response_format: request.response_format.and_then(|f| match f {
                ResponseFormat::JsonObject => {
                    Some(serde_json::json!({"type": "json_object"}))
                }
                ResponseFormat::Text => None,
            }),
            tools: request
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect(),
            tool_choice: request.tool_choice.map(|c| match c {
                ToolChoice::Auto => "auto",
                ToolChoice::None => "none",
                ToolChoice::Required => "required",
            }),
        }
    }
}

fn retry_after_header(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl Llm for HttpLlmClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = self.wire_request(&request);

        let mut builder = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                VigilError::Timeout {
                    duration: Duration::from_secs(self.config.timeout_secs),
                }
            } else {
                VigilError::ConnectionFailed {
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after_header(&response);
            return Err(VigilError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(VigilError::ProviderError {
                status: status.as_u16(),
                message: message.chars().take(500).collect(),
            });
        }

        let wire: WireResponse = response.json().await.map_err(|e| VigilError::ProviderError {
            status: status.as_u16(),
            message: format!("unparseable response: {}", e),
        })?;

        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| VigilError::ProviderError {
                status: status.as_u16(),
                message: "empty choices".to_string(),
            })?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|tc| {
                let arguments = serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(serde_json::Value::Null);
                LlmToolCall {
                    id: tc.id,
                    name: tc.function.name,
                    arguments,
                }
            })
            .collect::<Vec<_>>();

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("tool_calls") => FinishReason::ToolCalls,
            _ if !tool_calls.is_empty() => FinishReason::ToolCalls,
            _ => FinishReason::Other,
        };

        Ok(LlmResponse {
            content: choice.message.content.unwrap_or_default(),
            model: wire
                .model
                .unwrap_or_else(|| self.config.model_for(request.role).to_string()),
            usage: wire.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
            finish_reason,
            tool_calls,
        })
    }
}

/// Scripted adapter for tests: returns canned responses in order, then
/// repeats the last one.
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<Result<LlmResponse>>>,
    calls: Mutex<Vec<LlmRequest>>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<Result<LlmResponse>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Convenience: always answer with this text
    pub fn always(text: impl Into<String>) -> Self {
        Self::new(vec![Ok(LlmResponse {
            content: text.into(),
            model: "scripted".to_string(),
            usage: None,
            finish_reason: FinishReason::Stop,
            tool_calls: Vec::new(),
        })])
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<LlmRequest> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Llm for ScriptedLlm {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        self.calls.lock().push(request);
        let mut responses = self.responses.lock();
        let response = if responses.len() > 1 {
            responses.pop_front()
        } else {
            responses.front().map(clone_result)
        };
        response.unwrap_or_else(|| {
            Err(VigilError::Internal {
                message: "scripted llm has no responses".to_string(),
            })
        })
    }
}

fn clone_result(r: &Result<LlmResponse>) -> Result<LlmResponse> {
    match r {
        Ok(resp) => Ok(resp.clone()),
        Err(e) => Err(VigilError::Internal {
            message: format!("scripted error: {}", e),
        }),
    }
}
