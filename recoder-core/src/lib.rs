//! # recoder core
//!
//! The pieces a self-correcting code generation loop is built from.
//!
//! ## Core Concepts
//! - **Provider**: Trait-based LLM communication over the OpenAI protocol
//! - **Code Solution**: The structured artifact a model call produces
//! - **Model Client**: Conversation history in, code solution out
//! - **Sandbox**: Out-of-process execution with limits
//! - **Verifier**: Import check, then execution check
//! - **Config**: `recoder.toml` plus environment overrides

pub mod config;
pub mod error;
pub mod model;
pub mod provider;
pub mod sandbox;
pub mod solution;
pub mod validate;
pub mod verifier;

pub use config::{load_config, RecoderConfig, DEFAULT_CONFIG_FILE};
pub use error::{Error, ErrorKind, ErrorStatus, Result};
pub use model::{ModelClient, StructuredModelClient, CODE_GEN_SYSTEM_PROMPT};
pub use provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
    OpenAIProvider, ProviderConfig, ProviderError, Role, ToolCall, ToolDefinition, Usage,
};
pub use sandbox::{
    ExecFailure, ExecMode, ExecOutcome, ExecReport, ExecRequest, Executor, PythonSandbox,
    SandboxConfig,
};
pub use solution::CodeSolution;
pub use validate::{validate_code, ValidationReport};
pub use verifier::{Failure, Stage, Verdict, Verifier};
