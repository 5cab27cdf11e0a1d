//! Run state threaded through the loop.

use recoder_core::verifier::Failure;
use recoder_core::{ChatMessage, CodeSolution, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

/// Default number of generations a run may spend
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Verification status of the current solution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorFlag {
    /// Freshly generated, not yet verified
    Unresolved,
    Failed,
    Passed,
}

impl ErrorFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorFlag::Unresolved => "unresolved",
            ErrorFlag::Failed => "failed",
            ErrorFlag::Passed => "passed",
        }
    }
}

impl fmt::Display for ErrorFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorFlag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unresolved" => Ok(ErrorFlag::Unresolved),
            "failed" => Ok(ErrorFlag::Failed),
            "passed" => Ok(ErrorFlag::Passed),
            other => Err(Error::parse_failed(format!("unknown error flag '{}'", other))
                .with_operation("ErrorFlag::from_str")),
        }
    }
}

/// How many generations a run may spend. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptBudget(NonZeroU32);

impl AttemptBudget {
    pub fn new(max_attempts: u32) -> Result<Self> {
        NonZeroU32::new(max_attempts)
            .map(Self)
            .ok_or_else(|| {
                Error::config_invalid("attempt budget must be at least 1")
                    .with_operation("AttemptBudget::new")
                    .with_context("max_attempts", max_attempts.to_string())
            })
    }

    pub fn get(&self) -> u32 {
        self.0.get()
    }
}

impl Default for AttemptBudget {
    fn default() -> Self {
        const DEFAULT: NonZeroU32 = match NonZeroU32::new(DEFAULT_MAX_ATTEMPTS) {
            Some(n) => n,
            None => panic!("default attempt budget must be non-zero"),
        };
        Self(DEFAULT)
    }
}

impl fmt::Display for AttemptBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mutable state of one run. Created per request, dropped with it.
#[derive(Debug, Clone)]
pub struct RunState {
    history: Vec<ChatMessage>,
    solution: Option<CodeSolution>,
    attempts: u32,
    flag: ErrorFlag,
}

impl RunState {
    /// Seed a run with the user's prompt
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            history: vec![ChatMessage::user(prompt)],
            solution: None,
            attempts: 0,
            flag: ErrorFlag::Unresolved,
        }
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn solution(&self) -> Option<&CodeSolution> {
        self.solution.as_ref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn flag(&self) -> ErrorFlag {
        self.flag
    }

    /// Text of the newest history entry
    pub fn latest_message(&self) -> Option<&str> {
        self.history.last().map(ChatMessage::text)
    }

    /// Consume one attempt. Only generation calls this.
    pub(crate) fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Install a new solution and record it in the conversation
    pub(crate) fn accept_solution(&mut self, solution: CodeSolution) {
        self.history.push(ChatMessage::assistant(solution.attempt_summary()));
        self.solution = Some(solution);
        self.flag = ErrorFlag::Unresolved;
    }

    pub(crate) fn mark_passed(&mut self) {
        self.flag = ErrorFlag::Passed;
    }

    /// Mark the solution failed and append the corrective feedback
    pub(crate) fn record_failure(&mut self, failure: &Failure) {
        self.history.push(ChatMessage::user(failure.feedback()));
        self.flag = ErrorFlag::Failed;
    }
}
