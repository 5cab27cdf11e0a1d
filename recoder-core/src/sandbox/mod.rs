//! # Sandboxed Execution
//!
//! Generated code never runs inside this process. An [`Executor`] takes a
//! source string and reports what happened when a fresh interpreter ran it:
//! completed, raised, or crashed. Anything that prevents an answer (the
//! interpreter is missing, the wall-clock limit is hit, the run is
//! cancelled) is an `Err`, which the agent treats as fatal.

mod capture;
mod harness;
pub mod python;

pub use python::PythonSandbox;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What the interpreter should do with the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    /// Compile and run in a fresh `__main__` namespace
    Exec,
    /// Compile only; reports syntax errors without running anything
    Compile,
}

/// A single execution request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub source: String,
    pub mode: ExecMode,
}

impl ExecRequest {
    pub fn exec(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            mode: ExecMode::Exec,
        }
    }

    pub fn compile(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            mode: ExecMode::Compile,
        }
    }
}

/// An exception raised by the executed code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecFailure {
    /// Exception class name, e.g. `NameError`
    pub error_type: String,
    pub message: String,
    /// Traceback restricted to frames of the executed source and below
    #[serde(default)]
    pub traceback: String,
    /// Line in the executed source where the error surfaced
    #[serde(default)]
    pub line: Option<u32>,
}

impl fmt::Display for ExecFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.error_type)
        } else {
            write!(f, "{}: {}", self.error_type, self.message)
        }
    }
}

/// How an execution ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Ran to the end without raising
    Completed,
    /// Raised an exception (including syntax errors)
    Raised(ExecFailure),
    /// Died without a report: signal, resource limit, `os._exit`
    Crashed { status: String },
}

/// Result of one execution
#[derive(Debug, Clone)]
pub struct ExecReport {
    pub outcome: ExecOutcome,
    /// Output the code printed, bounded
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ExecReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ExecOutcome::Completed)
    }

    /// Diagnostic text for a failed execution, `None` on success
    pub fn diagnostic(&self) -> Option<String> {
        match &self.outcome {
            ExecOutcome::Completed => None,
            ExecOutcome::Raised(failure) => {
                let mut text = failure.to_string();
                let tb = failure.traceback.trim_end();
                if !tb.is_empty() {
                    text.push_str("\n\n");
                    text.push_str(tb);
                }
                Some(text)
            }
            ExecOutcome::Crashed { status } => {
                let mut text = format!("interpreter terminated abnormally ({})", status);
                let stderr = self.stderr.trim_end();
                if !stderr.is_empty() {
                    text.push_str("\n\n");
                    text.push_str(stderr);
                }
                Some(text)
            }
        }
    }
}

/// Runs source code out of process
#[allow(async_fn_in_trait)]
pub trait Executor {
    /// Run one request in a fresh, disposable scope.
    ///
    /// Must kill the interpreter when `cancel` fires or the wall-clock limit
    /// is exceeded, returning `Cancelled` or `ExecutionTimeout`.
    async fn execute(&self, request: &ExecRequest, cancel: &CancellationToken) -> Result<ExecReport>;
}

/// Limits and permissions applied to every execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Interpreter binary, resolved through `PATH`
    pub interpreter: String,
    /// Wall-clock limit per execution
    pub timeout: Duration,
    /// Address-space limit (`RLIMIT_AS`) in MiB
    pub memory_limit_mb: Option<u64>,
    /// CPU-time limit (`RLIMIT_CPU`) in seconds
    pub cpu_limit_secs: Option<u64>,
    /// Per-stream bound on captured output
    pub output_limit_bytes: usize,
    pub allow_network: bool,
    /// Allow opening files outside the scratch directory
    pub allow_filesystem: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".into(),
            timeout: Duration::from_secs(30),
            memory_limit_mb: Some(1024),
            cpu_limit_secs: Some(30),
            output_limit_bytes: 64 * 1024,
            allow_network: false,
            allow_filesystem: false,
        }
    }
}

impl SandboxConfig {
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_memory_limit_mb(mut self, limit: Option<u64>) -> Self {
        self.memory_limit_mb = limit;
        self
    }

    pub fn with_cpu_limit_secs(mut self, limit: Option<u64>) -> Self {
        self.cpu_limit_secs = limit;
        self
    }

    pub fn with_network(mut self, allow: bool) -> Self {
        self.allow_network = allow;
        self
    }

    pub fn with_filesystem(mut self, allow: bool) -> Self {
        self.allow_filesystem = allow;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcome: ExecOutcome, stderr: &str) -> ExecReport {
        ExecReport {
            outcome,
            stdout: String::new(),
            stderr: stderr.into(),
            duration: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_diagnostic_for_raised() {
        let failure = ExecFailure {
            error_type: "NameError".into(),
            message: "name 'x' is not defined".into(),
            traceback: "Traceback (most recent call last):\n  File \"<solution>\", line 1\n".into(),
            line: Some(1),
        };
        let r = report(ExecOutcome::Raised(failure), "");
        let text = r.diagnostic().unwrap();
        assert!(text.starts_with("NameError: name 'x' is not defined"));
        assert!(text.contains("<solution>"));
        assert!(!r.is_success());
    }

    #[test]
    fn test_diagnostic_for_crash_includes_stderr() {
        let r = report(
            ExecOutcome::Crashed { status: "signal: 9 (SIGKILL)".into() },
            "Killed",
        );
        let text = r.diagnostic().unwrap();
        assert!(text.contains("SIGKILL"));
        assert!(text.ends_with("Killed"));
    }

    #[test]
    fn test_completed_has_no_diagnostic() {
        let r = report(ExecOutcome::Completed, "warning: deprecated");
        assert!(r.is_success());
        assert!(r.diagnostic().is_none());
    }

    #[test]
    fn test_failure_display_without_message() {
        let failure = ExecFailure {
            error_type: "KeyboardInterrupt".into(),
            message: String::new(),
            traceback: String::new(),
            line: None,
        };
        assert_eq!(failure.to_string(), "KeyboardInterrupt");
    }
}
