//! The error type shared by every recoder crate

use crate::{ErrorKind, ErrorStatus};
use std::fmt;
use std::time::Duration;

/// A fatal failure of some recoder operation.
///
/// Carries what went wrong (`kind`), whether trying again could help
/// (`status`), where it happened (`operation`, with earlier operations kept
/// in context as `called`), key-value details and the wrapped cause.
///
/// ```rust
/// use recoder_error::{Error, ErrorKind};
///
/// let err = Error::new(ErrorKind::InferenceFailed, "model returned empty response")
///     .with_operation("model::generate")
///     .with_context("model", "openai/gpt-oss-20b");
///
/// assert_eq!(err.kind(), ErrorKind::InferenceFailed);
/// assert!(err.is_retryable());
/// assert_eq!(
///     err.to_string(),
///     "model::generate: model returned empty response (model=openai/gpt-oss-20b)"
/// );
/// ```
pub struct Error {
    kind: ErrorKind,
    message: String,
    status: ErrorStatus,
    operation: &'static str,
    context: Vec<(&'static str, String)>,
    source: Option<anyhow::Error>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: ErrorStatus::default_for(kind),
            operation: "",
            context: Vec::new(),
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> ErrorStatus {
        self.status
    }

    /// Innermost-last operation name, empty when never set
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn context(&self) -> &[(&'static str, String)] {
        &self.context
    }

    /// First context value stored under `key`
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn source_ref(&self) -> Option<&anyhow::Error> {
        self.source.as_ref()
    }

    pub fn is_retryable(&self) -> bool {
        self.status.is_retryable()
    }

    pub fn with_status(mut self, status: ErrorStatus) -> Self {
        self.status = status;
        self
    }

    /// Record the operation that failed. A previously recorded operation is
    /// kept in context as `called`.
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        if !self.operation.is_empty() && self.operation != operation {
            self.context.push(("called", self.operation.to_string()));
        }
        self.operation = operation;
        self
    }

    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Attach the underlying cause. Setting it twice is a bug (debug assert).
    pub fn set_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "source error already set");
        self.source = Some(source.into());
        self
    }

    /// Temporary becomes persistent once the caller gave up retrying
    pub fn persist(mut self) -> Self {
        self.status = self.status.persist();
        self
    }
}

// Constructors for the kinds raised in more than one place.
impl Error {
    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigInvalid, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn inference_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InferenceFailed, message)
    }

    pub fn malformed_solution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedSolution, message)
    }

    pub fn sandbox_unavailable(interpreter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::SandboxUnavailable, reason).with_context("interpreter", interpreter)
    }

    pub fn execution_timeout(limit: Duration) -> Self {
        Self::new(
            ErrorKind::ExecutionTimeout,
            format!("execution exceeded wall-clock limit of {}ms", limit.as_millis()),
        )
        .with_context("timeout_ms", limit.as_millis().to_string())
    }

    /// `during` names the step that was interrupted, e.g. `generation`
    pub fn cancelled(during: impl Into<String>) -> Self {
        let during = during.into();
        Self::new(ErrorKind::Cancelled, format!("run cancelled during {}", during))
            .with_context("during", during)
    }

    pub fn invariant_violated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvariantViolated, message)
    }

    pub fn parse_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseFailed, message)
    }

    pub fn serialization_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SerializationFailed, message)
    }
}

/// One line, meant for people: `operation: message (key=value, ...)`.
/// The kind is left out; it travels separately (see `ErrorKind::as_str`).
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.operation.is_empty() {
            write!(f, "{}: ", self.operation)?;
        }
        if self.message.is_empty() {
            write!(f, "{}", self.kind)?;
        } else {
            write!(f, "{}", self.message)?;
        }

        if let Some(((first_key, first_value), rest)) = self.context.split_first() {
            write!(f, " ({}={}", first_key, first_value)?;
            for (key, value) in rest {
                write!(f, ", {}={}", key, value)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// Everything, including the source chain, for `RUST_LOG=debug`
impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.kind, self.status)?;
        if !self.operation.is_empty() {
            write!(f, " in {}", self.operation)?;
        }
        if !self.message.is_empty() {
            write!(f, "\n  message: {}", self.message)?;
        }
        for (key, value) in &self.context {
            write!(f, "\n  {}: {}", key, value)?;
        }
        if let Some(source) = &self.source {
            write!(f, "\n  caused by: {:#}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// Only std I/O converts implicitly; everything else is mapped at its call site
// so the kind is chosen deliberately.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::FileNotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            _ => ErrorKind::IoFailed,
        };
        Error::new(kind, err.to_string()).with_operation("io").set_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::new(ErrorKind::MalformedSolution, "missing field `imports`");
        assert_eq!(err.kind(), ErrorKind::MalformedSolution);
        assert_eq!(err.message(), "missing field `imports`");
        assert_eq!(err.status(), ErrorStatus::Permanent);
        assert_eq!(err.operation(), "");
    }

    #[test]
    fn test_context_lookup() {
        let err = Error::new(ErrorKind::InferenceFailed, "timeout")
            .with_context("model", "openai/gpt-oss-20b")
            .with_context("messages", "4");

        assert_eq!(err.context().len(), 2);
        assert_eq!(err.context_value("messages"), Some("4"));
        assert_eq!(err.context_value("missing"), None);
    }

    #[test]
    fn test_operation_chaining_keeps_callee() {
        let err = Error::new(ErrorKind::IoFailed, "broken pipe")
            .with_operation("sandbox::execute")
            .with_operation("verifier::verify")
            .with_operation("verifier::verify");

        assert_eq!(err.operation(), "verifier::verify");
        assert_eq!(err.context(), &[("called", "sandbox::execute".to_string())]);
    }

    #[test]
    fn test_status_follows_kind() {
        assert!(Error::new(ErrorKind::NetworkFailed, "connection refused").is_retryable());
        assert!(!Error::execution_timeout(Duration::from_secs(1)).is_retryable());

        let err = Error::new(ErrorKind::RateLimited, "slow down").persist();
        assert!(!err.is_retryable());
        assert_eq!(err.status(), ErrorStatus::Persistent);

        let err = Error::malformed_solution("bad json").with_status(ErrorStatus::Temporary);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_display_is_one_line() {
        let err = Error::new(ErrorKind::InferenceFailed, "model unavailable")
            .with_operation("provider::complete")
            .with_context("provider", "local")
            .with_context("http_status", "503");

        assert_eq!(
            err.to_string(),
            "provider::complete: model unavailable (provider=local, http_status=503)"
        );
        assert_eq!(Error::new(ErrorKind::Cancelled, "").to_string(), "Cancelled");
    }

    #[test]
    fn test_debug_includes_kind_and_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "pipe closed");
        let debug = format!("{:?}", Error::from(io_err).with_operation("sandbox::execute"));
        assert!(debug.starts_with("IoFailed [permanent] in sandbox::execute"));
        assert!(debug.contains("called: io"));
        assert!(debug.contains("caused by: pipe closed"));
    }

    #[test]
    fn test_convenience_constructors() {
        let err = Error::execution_timeout(Duration::from_secs(2));
        assert_eq!(err.kind(), ErrorKind::ExecutionTimeout);
        assert!(err.message().contains("2000ms"));

        let err = Error::cancelled("verification");
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(err.context_value("during"), Some("verification"));

        let err = Error::sandbox_unavailable("python3", "No such file or directory");
        assert_eq!(err.kind(), ErrorKind::SandboxUnavailable);
        assert_eq!(err.context_value("interpreter"), Some("python3"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "recoder.toml");
        let err = Error::from(io_err);

        assert_eq!(err.kind(), ErrorKind::FileNotFound);
        assert_eq!(err.operation(), "io");
        assert!(err.source_ref().is_some());
    }
}
