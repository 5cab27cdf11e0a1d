//! Generation node: one model call per attempt.

use crate::state::RunState;
use recoder_core::{ModelClient, Result};
use tracing::{info, instrument};

/// Spend one attempt asking the model for a solution.
///
/// The attempt counts even when the model call fails. On success the
/// solution summary joins the history and the flag goes back to unresolved.
#[instrument(skip_all, fields(attempt = state.attempts() + 1))]
pub async fn generate<M: ModelClient>(model: &M, state: &mut RunState) -> Result<()> {
    let attempt = state.begin_attempt();
    let solution = model.generate(state.history()).await?;
    info!(
        attempt,
        imports = solution.has_imports(),
        inline_imports = solution.inline_imports().len(),
        "solution generated"
    );
    state.accept_solution(solution);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ErrorFlag;
    use recoder_core::{ChatMessage, CodeSolution, Error, ErrorKind};
    use tokio_test::{assert_err, assert_ok};

    struct OneShot(Option<CodeSolution>);

    impl ModelClient for OneShot {
        async fn generate(&self, history: &[ChatMessage]) -> Result<CodeSolution> {
            assert!(!history.is_empty());
            self.0.clone().ok_or_else(|| Error::inference_failed("backend down"))
        }
    }

    #[tokio::test]
    async fn test_generate_increments_and_records() {
        let mut state = RunState::new("add two numbers");
        let model = OneShot(Some(CodeSolution::new("adds", "", "def add(a,b): return a+b")));

        assert_ok!(generate(&model, &mut state).await);
        assert_eq!(state.attempts(), 1);
        assert_eq!(state.flag(), ErrorFlag::Unresolved);
        assert_eq!(state.history().len(), 2);
        assert_eq!(state.solution().unwrap().body, "def add(a,b): return a+b");
        assert!(state.latest_message().unwrap().starts_with("Here is my solution attempt:"));
    }

    #[tokio::test]
    async fn test_failed_call_still_consumes_attempt() {
        let mut state = RunState::new("q");
        let err = assert_err!(generate(&OneShot(None), &mut state).await);
        assert_eq!(err.kind(), ErrorKind::InferenceFailed);
        assert_eq!(state.attempts(), 1);
        assert_eq!(state.history().len(), 1);
        assert!(state.solution().is_none());
    }
}
