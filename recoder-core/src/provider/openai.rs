//! `/chat/completions` client for OpenAI-compatible servers.
//!
//! Non-streaming: the loop needs the whole solution before it can run it.

use super::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, ProviderConfig,
    ProviderError, ToolCall, ToolDefinition, Usage,
};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub struct OpenAIProvider {
    client: Client,
    config: ProviderConfig,
}

impl OpenAIProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Transport(format!("building HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn wire_request<'a>(&'a self, request: &'a CompletionRequest) -> WireRequest<'a> {
        WireRequest {
            model: request.model.as_deref().unwrap_or(&self.config.model),
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
            tools: request.forced_tool.as_ref().map(|tool| vec![WireTool::function(tool)]),
            tool_choice: request.forced_tool.as_ref().map(|tool| WireToolChoice::function(&tool.name)),
        }
    }
}

impl LlmProvider for OpenAIProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let body = self.wire_request(&request);
        debug!(
            provider = self.name(),
            model = body.model,
            messages = body.messages.len(),
            forced_tool = request.forced_tool.as_ref().map(|t| t.name.as_str()),
            "sending completion request"
        );

        let mut http = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            http = http.bearer_auth(key);
        }

        let response = http.send().await.map_err(|e| ProviderError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, retry_after, text, body.model));
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        let completion = wire.into_completion()?;

        debug!(
            finish_reason = ?completion.finish_reason,
            tool_calls = completion.tool_calls.len(),
            total_tokens = completion.usage.map(|u| u.total()),
            "completion received"
        );
        Ok(completion)
    }
}

fn status_error(status: StatusCode, retry_after: Option<Duration>, body: String, model: &str) -> ProviderError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Unauthorized,
        StatusCode::NOT_FOUND if body.contains("model") => ProviderError::UnknownModel(model.to_string()),
        _ => ProviderError::Status {
            code: status.as_u16(),
            body,
        },
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<WireToolChoice<'a>>,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    r#type: &'static str,
    function: &'a ToolDefinition,
}

impl<'a> WireTool<'a> {
    fn function(tool: &'a ToolDefinition) -> Self {
        Self {
            r#type: "function",
            function: tool,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireToolChoice<'a> {
    r#type: &'static str,
    function: WireName<'a>,
}

impl<'a> WireToolChoice<'a> {
    fn function(name: &'a str) -> Self {
        Self {
            r#type: "function",
            function: WireName { name },
        }
    }
}

#[derive(Debug, Serialize)]
struct WireName<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    model: String,
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

impl WireResponse {
    fn into_completion(self) -> Result<CompletionResponse, ProviderError> {
        let choice = self.choices.into_iter().next().ok_or(ProviderError::EmptyResponse)?;
        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect();

        Ok(CompletionResponse {
            model: self.model,
            content: choice.message.content,
            tool_calls,
            finish_reason: FinishReason::parse(choice.finish_reason.as_deref().unwrap_or("")),
            usage: self.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    function: WireFunctionCall,
}

#[derive(Debug, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
