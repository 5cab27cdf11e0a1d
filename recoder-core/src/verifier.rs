//! # Execution Verifier
//!
//! Two checks per solution, each in its own interpreter process:
//!
//! 1. the `imports` text alone
//! 2. `imports` + newline + `body`
//!
//! The import check only sees the import text. A name used in the body but
//! never imported gets past it and fails at the execution check instead.

use crate::error::Result;
use crate::sandbox::{ExecReport, ExecRequest, Executor};
use crate::solution::CodeSolution;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Which check rejected the solution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Imports,
    Execution,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Imports => write!(f, "imports"),
            Stage::Execution => write!(f, "execution"),
        }
    }
}

/// A rejected solution: stage plus the diagnostic the interpreter produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub stage: Stage,
    /// `Type: message` followed by the traceback, or the crash status
    pub detail: String,
}

impl Failure {
    /// Corrective message appended to the conversation before the next attempt
    pub fn feedback(&self) -> String {
        match self.stage {
            Stage::Imports => format!(
                "Import test failed!\n\nException:\n{}\n\nPlease fix the import section.",
                self.detail
            ),
            Stage::Execution => format!(
                "Your code failed during execution!\n\nException:\n{}\n\n\
                 1) Explain what went wrong\n\
                 2) Fix the solution\n\
                 Return the FULL solution (prefix, imports, code).",
                self.detail
            ),
        }
    }
}

/// Outcome of verifying one solution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Failed(Failure),
}

impl Verdict {
    pub fn is_passed(&self) -> bool {
        matches!(self, Verdict::Passed)
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Verdict::Passed => None,
            Verdict::Failed(failure) => Some(failure),
        }
    }
}

/// Runs the import and execution checks through an [`Executor`]
#[derive(Debug, Clone)]
pub struct Verifier<E: Executor> {
    executor: E,
}

impl<E: Executor> Verifier<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Verify a solution. `Err` means the sandbox could not give an answer
    /// (unavailable, timed out, cancelled), not that the code is wrong.
    #[instrument(skip_all, fields(imports_len = solution.imports.len(), body_len = solution.body.len()))]
    pub async fn verify(&self, solution: &CodeSolution, cancel: &CancellationToken) -> Result<Verdict> {
        if !solution.inline_imports().is_empty() {
            debug!(count = solution.inline_imports().len(), "body contains import statements");
        }

        if solution.has_imports() {
            let report = self
                .executor
                .execute(&ExecRequest::exec(solution.imports.clone()), cancel)
                .await?;
            if let Some(failure) = failed(Stage::Imports, &report) {
                info!(stage = %failure.stage, "verification failed");
                return Ok(Verdict::Failed(failure));
            }
        } else {
            debug!("no imports, skipping import check");
        }

        let report = self
            .executor
            .execute(&ExecRequest::exec(solution.program()), cancel)
            .await?;
        if let Some(failure) = failed(Stage::Execution, &report) {
            info!(stage = %failure.stage, "verification failed");
            return Ok(Verdict::Failed(failure));
        }

        info!(elapsed_ms = report.duration.as_millis() as u64, "verification passed");
        Ok(Verdict::Passed)
    }
}

fn failed(stage: Stage, report: &ExecReport) -> Option<Failure> {
    report.diagnostic().map(|detail| Failure { stage, detail })
}
