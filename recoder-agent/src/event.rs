//! Events a run emits, serialized as `{"type": ..., "data": ...}`.

use crate::route::HaltReason;
use crate::state::AttemptBudget;
use recoder_core::{CodeSolution, Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};

/// Phase reported by a `status` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Initializing,
    Generated,
    Retrying,
    Exhausted,
    Passed,
}

impl Phase {
    /// Human-readable label, e.g. `RETRYING (Attempt 1/3)`
    pub fn label(&self, attempts: u32, max_attempts: u32) -> String {
        match self {
            Phase::Initializing => "INITIALIZING".into(),
            Phase::Generated => "GENERATED".into(),
            Phase::Retrying => format!("RETRYING (Attempt {}/{})", attempts, max_attempts),
            Phase::Exhausted => format!("EXHAUSTED (Attempt {}/{})", attempts, max_attempts),
            Phase::Passed => "PASSED".into(),
        }
    }
}

impl From<HaltReason> for Phase {
    fn from(reason: HaltReason) -> Self {
        match reason {
            HaltReason::Passed => Phase::Passed,
            HaltReason::Exhausted => Phase::Exhausted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub phase: Phase,
    pub label: String,
    pub attempts: u32,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteEvent {
    pub solution: CodeSolution,
    pub total_attempts: u32,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Error kind name, e.g. `NetworkFailed`
    pub kind: String,
    pub message: String,
    /// Attempts recorded when the run failed
    pub attempts: u32,
}

impl ErrorEvent {
    /// `None` when the event came from a newer producer with kinds we do not know
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.kind.parse().ok()
    }
}

/// One event of a run. `Complete` or `Error` is always last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum RunEvent {
    Status(StatusEvent),
    Code(CodeSolution),
    Message(String),
    Complete(CompleteEvent),
    Error(ErrorEvent),
}

impl RunEvent {
    pub fn status(phase: Phase, attempts: u32, budget: AttemptBudget) -> Self {
        RunEvent::Status(StatusEvent {
            phase,
            label: phase.label(attempts, budget.get()),
            attempts,
            max_attempts: budget.get(),
        })
    }

    /// Message event with `text` cut to at most `limit` characters
    pub fn message(text: &str, limit: usize) -> Self {
        RunEvent::Message(truncate_chars(text, limit))
    }

    pub fn complete(solution: CodeSolution, total_attempts: u32, success: bool) -> Self {
        RunEvent::Complete(CompleteEvent {
            solution,
            total_attempts,
            success,
        })
    }

    pub fn error(err: &Error, attempts: u32) -> Self {
        RunEvent::Error(ErrorEvent {
            kind: err.kind().as_str().to_string(),
            message: err.to_string(),
            attempts,
        })
    }

    /// `complete` or `error`
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Complete(_) | RunEvent::Error(_))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::serialization_failed(e.to_string()).with_operation("RunEvent::to_json"))
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!(Phase::Initializing.label(0, 3), "INITIALIZING");
        assert_eq!(Phase::Retrying.label(1, 3), "RETRYING (Attempt 1/3)");
        assert_eq!(Phase::Exhausted.label(3, 3), "EXHAUSTED (Attempt 3/3)");
        assert_eq!(Phase::from(HaltReason::Passed), Phase::Passed);
    }

    #[test]
    fn test_wire_shape() {
        let budget = AttemptBudget::new(3).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&RunEvent::status(Phase::Retrying, 2, budget).to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["data"]["label"], "RETRYING (Attempt 2/3)");
        assert_eq!(json["data"]["phase"], "RETRYING");
        assert_eq!(json["data"]["max_attempts"], 3);

        let complete = RunEvent::complete(CodeSolution::new("d", "", "x = 1"), 1, true);
        let json = serde_json::to_value(&complete).unwrap();
        assert_eq!(json["type"], "complete");
        assert_eq!(json["data"]["solution"]["body"], "x = 1");
        assert_eq!(json["data"]["success"], true);

        let message = serde_json::to_value(RunEvent::message("hello", 500)).unwrap();
        assert_eq!(message, serde_json::json!({"type": "message", "data": "hello"}));
    }

    #[test]
    fn test_message_truncation_respects_chars() {
        let long = "é".repeat(600);
        match RunEvent::message(&long, 500) {
            RunEvent::Message(text) => assert_eq!(text.chars().count(), 500),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_error_event_carries_kind_and_attempts() {
        let err = Error::new(ErrorKind::NetworkFailed, "connection refused");
        let event = RunEvent::error(&err, 1);
        assert!(event.is_terminal());
        match event {
            RunEvent::Error(e) => {
                assert_eq!(e.kind, "NetworkFailed");
                assert!(e.message.contains("connection refused"));
                assert_eq!(e.attempts, 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_events_deserialize() {
        let json = r#"{"type":"error","data":{"kind":"Cancelled","message":"m","attempts":2}}"#;
        let event: RunEvent = serde_json::from_str(json).unwrap();
        match event {
            RunEvent::Error(e) => {
                assert_eq!(e.attempts, 2);
                assert_eq!(e.error_kind(), Some(ErrorKind::Cancelled));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
