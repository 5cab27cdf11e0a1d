//! # Model Client
//!
//! Turns a conversation history into a [`CodeSolution`]. Structured output is
//! forced through a single tool call; anything that does not parse into the
//! three solution fields is a hard failure. Retrying is the caller's business.

use crate::error::{self, Error, Result};
use crate::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::solution::{CodeSolution, SOLUTION_TOOL_NAME};
use tracing::{debug, instrument, warn};

/// System prompt prepended to every generation request
pub const CODE_GEN_SYSTEM_PROMPT: &str = "You are a coding assistant.
Ensure any code you provide can be executed with all required imports and variables defined.
Structure your answer as follows:
1) a prefix describing the solution
2) the imports (if no imports needed keep it empty)
3) executable code blocks";

/// Anything that can produce a code solution from a conversation
#[allow(async_fn_in_trait)]
pub trait ModelClient {
    /// Generate a solution for the given history (system prompt excluded)
    async fn generate(&self, history: &[ChatMessage]) -> Result<CodeSolution>;
}

/// Model client backed by an [`LlmProvider`] with forced structured output
pub struct StructuredModelClient<P: LlmProvider> {
    provider: P,
    model: Option<String>,
    temperature: f32,
    max_tokens: Option<u32>,
    system_prompt: String,
}

impl<P: LlmProvider> StructuredModelClient<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            model: None,
            temperature: 0.0,
            max_tokens: None,
            system_prompt: CODE_GEN_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Override the provider's default model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Cap on generated tokens; unset leaves it to the server
    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn build_request(&self, history: &[ChatMessage]) -> CompletionRequest {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(&self.system_prompt));
        messages.extend(history.iter().cloned());

        let mut request = CompletionRequest::new(messages)
            .with_temperature(self.temperature)
            .forcing(CodeSolution::tool_definition());
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        match &self.model {
            Some(model) => request.with_model(model.clone()),
            None => request,
        }
    }
}

impl<P: LlmProvider> ModelClient for StructuredModelClient<P> {
    #[instrument(skip_all, fields(provider = self.provider.name(), messages = history.len()))]
    async fn generate(&self, history: &[ChatMessage]) -> Result<CodeSolution> {
        let request = self.build_request(history);
        let response = self
            .provider
            .complete(request)
            .await
            .map_err(|e| {
                Error::from(e)
                    .with_operation("model::generate")
                    .with_context("provider", self.provider.name().to_string())
            })?;

        if let Some(call) = response.tool_calls.iter().find(|c| c.name == SOLUTION_TOOL_NAME) {
            debug!(tool_call = %call.id, "solution returned as tool call");
            return call.decode_arguments::<CodeSolution>().map_err(|e| {
                error::malformed_solution(
                    format!("tool call arguments do not match the solution schema: {}", e),
                    &call.arguments,
                )
                .with_operation("model::generate")
            });
        }

        if let Some(call) = response.tool_calls.first() {
            return Err(error::malformed_solution(
                format!("model called unexpected tool '{}'", call.name),
                &call.arguments,
            )
            .with_operation("model::generate"));
        }

        // Servers without tool support answer in plain content.
        match response.content.as_deref() {
            Some(content) if !content.trim().is_empty() => {
                warn!("no tool call in response, parsing message content");
                CodeSolution::from_model_output(content)
                    .map_err(|e| e.with_operation("model::generate"))
            }
            _ => Err(Error::malformed_solution("model returned neither a tool call nor content")
                .with_operation("model::generate")
                .with_context("finish_reason", format!("{:?}", response.finish_reason))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::provider::{
        CompletionResponse, FinishReason, ProviderError, Role, ToolCall,
    };
    use std::sync::Mutex;

    type Canned = std::result::Result<CompletionResponse, ProviderError>;

    /// Provider returning a canned response and recording the request
    struct CannedProvider {
        response: Mutex<Option<Canned>>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl CannedProvider {
        fn new(response: Canned) -> Self {
            Self {
                response: Mutex::new(Some(response)),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl LlmProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        fn model(&self) -> &str {
            "canned-model"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Canned {
            self.seen.lock().unwrap().push(request);
            self.response.lock().unwrap().take().expect("single response")
        }
    }

    fn response(content: Option<&str>, tool_calls: Vec<ToolCall>) -> CompletionResponse {
        CompletionResponse {
            model: "canned-model".into(),
            content: content.map(str::to_string),
            tool_calls,
            finish_reason: FinishReason::Stop,
            usage: None,
        }
    }

    fn solution_call(arguments: &str) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: SOLUTION_TOOL_NAME.into(),
            arguments: arguments.into(),
        }
    }

    #[tokio::test]
    async fn test_tool_call_parsed_into_solution() {
        let provider = CannedProvider::new(Ok(response(
            None,
            vec![solution_call(r#"{"description":"adds","imports":"","body":"def add(a,b): return a+b"}"#)],
        )));
        let client = StructuredModelClient::new(provider);

        let history = vec![ChatMessage::user("write a function to add two numbers")];
        let solution = client.generate(&history).await.unwrap();
        assert_eq!(solution.body, "def add(a,b): return a+b");

        let seen = client.provider().seen.lock().unwrap();
        let request = &seen[0];
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[0].text(), CODE_GEN_SYSTEM_PROMPT);
        assert_eq!(request.messages[1].text(), "write a function to add two numbers");
        assert_eq!(request.temperature, Some(0.0));
        assert_eq!(request.max_tokens, None);
        assert_eq!(
            request.forced_tool.as_ref().map(|t| t.name.as_str()),
            Some(SOLUTION_TOOL_NAME)
        );
    }

    #[tokio::test]
    async fn test_content_fallback() {
        let provider = CannedProvider::new(Ok(response(
            Some("```json\n{\"description\":\"d\",\"imports\":\"import os\",\"body\":\"print(os.sep)\"}\n```"),
            vec![],
        )));
        let client = StructuredModelClient::new(provider)
            .with_model("other-model")
            .with_max_tokens(Some(512))
            .with_system_prompt("Answer in Python.");

        let solution = client.generate(&[ChatMessage::user("q")]).await.unwrap();
        assert_eq!(solution.imports, "import os");

        let seen = client.provider().seen.lock().unwrap();
        assert_eq!(seen[0].model.as_deref(), Some("other-model"));
        assert_eq!(seen[0].messages[0].text(), "Answer in Python.");
        assert_eq!(seen[0].max_tokens, Some(512));
    }

    #[tokio::test]
    async fn test_bad_arguments_are_malformed() {
        let provider = CannedProvider::new(Ok(response(
            None,
            vec![solution_call(r#"{"description":"d","imports":""}"#)],
        )));
        let client = StructuredModelClient::new(provider);

        let err = client.generate(&[ChatMessage::user("q")]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedSolution);
        assert_eq!(err.operation(), "model::generate");
    }

    #[tokio::test]
    async fn test_empty_response_is_malformed() {
        let provider = CannedProvider::new(Ok(response(Some("   "), vec![])));
        let client = StructuredModelClient::new(provider);

        let err = client.generate(&[ChatMessage::user("q")]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedSolution);
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let provider = CannedProvider::new(Err(ProviderError::Transport("connection refused".into())));
        let client = StructuredModelClient::new(provider);

        let err = client.generate(&[ChatMessage::user("q")]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NetworkFailed);
        assert_eq!(err.operation(), "model::generate");
        assert_eq!(err.context_value("provider"), Some("canned"));
    }
}
