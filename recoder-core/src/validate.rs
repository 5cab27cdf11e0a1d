//! Standalone code validation: syntax check, then the import lines alone.

use crate::error::Result;
use crate::sandbox::{ExecOutcome, ExecRequest, Executor};
use crate::solution::is_import_line;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Result of validating a code string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    /// Exception type name when invalid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message: String,
    /// Line number, reported for syntax errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl ValidationReport {
    fn ok() -> Self {
        Self {
            valid: true,
            error: None,
            message: "Code validation successful".into(),
            line: None,
        }
    }
}

/// The import statements of `code`, one per line, leading whitespace removed
pub fn extract_import_lines(code: &str) -> String {
    code.lines()
        .map(str::trim)
        .filter(|line| is_import_line(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Compile `code` without running it, then run only its import lines.
#[instrument(skip_all, fields(code_len = code.len()))]
pub async fn validate_code<E: Executor>(
    executor: &E,
    code: &str,
    cancel: &CancellationToken,
) -> Result<ValidationReport> {
    let report = executor.execute(&ExecRequest::compile(code), cancel).await?;
    if let Some(invalid) = invalid(report.outcome, true) {
        return Ok(invalid);
    }

    let imports = extract_import_lines(code);
    if imports.is_empty() {
        return Ok(ValidationReport::ok());
    }

    let report = executor.execute(&ExecRequest::exec(imports), cancel).await?;
    Ok(invalid(report.outcome, false).unwrap_or_else(ValidationReport::ok))
}

fn invalid(outcome: ExecOutcome, with_line: bool) -> Option<ValidationReport> {
    match outcome {
        ExecOutcome::Completed => None,
        ExecOutcome::Raised(failure) => Some(ValidationReport {
            valid: false,
            error: Some(failure.error_type),
            message: failure.message,
            line: if with_line { failure.line } else { None },
        }),
        ExecOutcome::Crashed { status } => Some(ValidationReport {
            valid: false,
            error: Some("Crashed".into()),
            message: format!("interpreter terminated abnormally ({})", status),
            line: None,
        }),
    }
}
