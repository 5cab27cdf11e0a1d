//! recoder-core error helpers
//!
//! Re-exports recoder-error and provides core-specific conveniences.

pub use recoder_error::{Error, ErrorKind, ErrorStatus, Result};

use crate::provider::ProviderError;

// =============================================================================
// Core-specific error constructors
// =============================================================================

/// Create a MalformedSolution error carrying a preview of what the model sent
pub fn malformed_solution(reason: impl Into<String>, raw: &str) -> Error {
    Error::malformed_solution(reason)
        .with_context("raw", preview(raw, 200))
}

/// Create an IoFailed error
pub fn io_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::IoFailed, message)
}

/// Create a SerializationFailed error
pub fn serialization_error(message: impl Into<String>) -> Error {
    Error::serialization_failed(message)
}

/// Create a ConfigInvalid error for a named field
pub fn config_invalid(field: &'static str, reason: impl Into<String>) -> Error {
    Error::config_invalid(reason).with_context("field", field)
}

/// Create a SandboxUnavailable error for a harness protocol breach
pub fn harness_protocol(interpreter: impl Into<String>, reason: impl Into<String>) -> Error {
    Error::sandbox_unavailable(interpreter, reason).with_context("cause", "harness protocol")
}

// =============================================================================
// Provider error mapping
// =============================================================================

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        let message = err.to_string();
        let mapped = match &err {
            ProviderError::Transport(_) => Error::new(ErrorKind::NetworkFailed, message),
            ProviderError::Status { code, .. } if *code >= 500 => {
                Error::new(ErrorKind::ProviderUnavailable, message).with_context("http_status", code.to_string())
            }
            ProviderError::Status { code, .. } => {
                Error::new(ErrorKind::InferenceFailed, message).with_context("http_status", code.to_string())
            }
            ProviderError::RateLimited { retry_after } => {
                let limited = Error::new(ErrorKind::RateLimited, message);
                match retry_after {
                    Some(wait) => limited.with_context("retry_after_secs", wait.as_secs().to_string()),
                    None => limited,
                }
            }
            ProviderError::Unauthorized => Error::new(ErrorKind::AuthenticationFailed, message),
            ProviderError::UnknownModel(model) => {
                Error::new(ErrorKind::ConfigInvalid, message).with_context("model", model.clone())
            }
            ProviderError::Decode(_) | ProviderError::EmptyResponse => {
                Error::new(ErrorKind::InferenceFailed, message)
            }
        };
        mapped.with_operation("provider::complete").set_source(err)
    }
}

/// Shorten text for logs and error context, respecting char boundaries
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_mapping() {
        let err: Error = ProviderError::Transport("connection refused".into()).into();
        assert_eq!(err.kind(), ErrorKind::NetworkFailed);
        assert!(err.is_retryable());
        assert_eq!(err.operation(), "provider::complete");

        let err: Error = ProviderError::Status { code: 503, body: "down".into() }.into();
        assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);

        let err: Error = ProviderError::Status { code: 400, body: "bad".into() }.into();
        assert_eq!(err.kind(), ErrorKind::InferenceFailed);
        assert!(err.context().iter().any(|(k, v)| *k == "http_status" && v == "400"));

        let err: Error = ProviderError::Unauthorized.into();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("héllo wörld", 5), "héllo…");
    }
}
