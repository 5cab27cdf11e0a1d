//! # Chat backends
//!
//! The model client only ever needs one thing from a backend: send a
//! conversation, get back either text or a call to the one tool we forced.
//!
//! ## Design
//! - `LlmProvider` is the seam; tests substitute canned providers
//! - `OpenAIProvider` speaks `/chat/completions` (OpenAI, vLLM, Ollama)
//! - Conversation turns are plain text; tool calls never enter the history

pub mod openai;

pub use openai::OpenAIProvider;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default local endpoint: a vLLM server speaking the OpenAI protocol
pub const DEFAULT_LOCAL_BASE_URL: &str = "http://localhost:5005/v1";
/// Model name served by the default local endpoint
pub const DEFAULT_LOCAL_MODEL: &str = "openai/gpt-oss-20b";

// ============================================================================
// Conversation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn text(&self) -> &str {
        &self.content
    }
}

// ============================================================================
// Tools
// ============================================================================

/// A function the model may be forced to call. `parameters` is a JSON schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A function call the model made. `arguments` is the raw JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn decode_arguments<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.arguments)
    }
}

// ============================================================================
// Requests and responses
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Falls back to the provider's configured model
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// When set, the model must answer by calling this tool
    pub forced_tool: Option<ToolDefinition>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn forcing(mut self, tool: ToolDefinition) -> Self {
        self.forced_tool = Some(tool);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "tool_calls" | "function_call" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Model the server says answered
    pub model: String,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Option<Usage>,
}

// ============================================================================
// Provider trait
// ============================================================================

/// Failures talking to a backend. Converted into [`crate::Error`] at the model client.
#[derive(Debug)]
pub enum ProviderError {
    /// Connection refused, DNS, TLS, client timeout
    Transport(String),
    /// Non-success HTTP status not covered below
    Status { code: u16, body: String },
    RateLimited { retry_after: Option<Duration> },
    Unauthorized,
    UnknownModel(String),
    /// Response body did not match the protocol
    Decode(String),
    /// Success status but no choices
    EmptyResponse,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "cannot reach model backend: {}", e),
            Self::Status { code, body } => write!(f, "model backend returned HTTP {}: {}", code, body),
            Self::RateLimited { retry_after: Some(wait) } => {
                write!(f, "rate limited by model backend, retry after {}s", wait.as_secs())
            }
            Self::RateLimited { retry_after: None } => write!(f, "rate limited by model backend"),
            Self::Unauthorized => write!(f, "model backend rejected the API key"),
            Self::UnknownModel(m) => write!(f, "model backend does not serve '{}'", m),
            Self::Decode(e) => write!(f, "unreadable response from model backend: {}", e),
            Self::EmptyResponse => write!(f, "model backend returned no choices"),
        }
    }
}

impl std::error::Error for ProviderError {}

#[allow(async_fn_in_trait)]
pub trait LlmProvider: Send + Sync {
    /// Short name for logs and error context
    fn name(&self) -> &str;

    /// Model used when a request does not name one
    fn model(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;
}

// ============================================================================
// Provider configuration
// ============================================================================

/// Where and how to reach an OpenAI-compatible endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    pub model: String,
    /// Sent as a bearer token when present and non-empty
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl ProviderConfig {
    /// A local OpenAI-compatible server (vLLM, Ollama, ...)
    pub fn local(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: "local".into(),
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            timeout: Duration::from_secs(300),
        }
    }

    /// The local vLLM endpoint the system is usually deployed against
    pub fn vllm() -> Self {
        Self::local(DEFAULT_LOCAL_BASE_URL, DEFAULT_LOCAL_MODEL)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_serialize_as_plain_turns() {
        let msg = ChatMessage::user("write a function");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "write a function"}));
        assert_eq!(ChatMessage::system("s").role.as_str(), "system");
    }

    #[test]
    fn test_tool_call_decodes_arguments() {
        #[derive(Deserialize)]
        struct Args {
            imports: String,
        }

        let call = ToolCall {
            id: "call_1".into(),
            name: "code_solution".into(),
            arguments: r#"{"imports": "import os"}"#.into(),
        };
        let args: Args = call.decode_arguments().unwrap();
        assert_eq!(args.imports, "import os");

        let broken = ToolCall { arguments: "{".into(), ..call };
        assert!(broken.decode_arguments::<Args>().is_err());
    }

    #[test]
    fn test_completion_request_builder() {
        let tool = ToolDefinition::new("code_solution", "solution", serde_json::json!({"type": "object"}));
        let request = CompletionRequest::new(vec![ChatMessage::user("Hello")])
            .with_model("gpt-4o")
            .with_temperature(0.0)
            .with_max_tokens(1000)
            .forcing(tool);

        assert_eq!(request.model.as_deref(), Some("gpt-4o"));
        assert_eq!(request.temperature, Some(0.0));
        assert_eq!(request.max_tokens, Some(1000));
        assert_eq!(request.forced_tool.map(|t| t.name).as_deref(), Some("code_solution"));
    }

    #[test]
    fn test_finish_reason_parse() {
        assert_eq!(FinishReason::parse("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(FinishReason::parse("length"), FinishReason::Length);
        assert_eq!(FinishReason::parse("eos"), FinishReason::Other("eos".into()));
    }

    #[test]
    fn test_provider_config() {
        let config = ProviderConfig::vllm().with_model("qwen").with_api_key("sk-test");
        assert_eq!(config.model, "qwen");
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));

        let config = ProviderConfig::vllm().with_timeout(Duration::from_secs(5));
        assert_eq!(config.name, "local");
        assert_eq!(config.base_url, DEFAULT_LOCAL_BASE_URL);
        assert_eq!(config.model, DEFAULT_LOCAL_MODEL);
        assert_eq!(config.api_key, None);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_error_display() {
        let err = ProviderError::RateLimited { retry_after: Some(Duration::from_secs(7)) };
        assert!(err.to_string().contains("retry after 7s"));
        assert!(ProviderError::Status { code: 502, body: "bad gateway".into() }
            .to_string()
            .contains("HTTP 502"));
    }
}
