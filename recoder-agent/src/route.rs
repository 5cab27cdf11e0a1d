//! Routing: halt or loop back to generation.

use crate::state::{AttemptBudget, ErrorFlag};
use recoder_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HaltReason {
    Passed,
    Exhausted,
}

/// Next step after verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Halt(HaltReason),
    Generate,
}

/// Decide the next step. `attempts` is the count after the latest generation.
///
/// Exhaustion wins over retrying. Reaching this with an unresolved flag and
/// budget left means verification never ran, which is a bug in the caller.
pub fn decide(flag: ErrorFlag, attempts: u32, budget: AttemptBudget) -> Result<Route> {
    let exhausted = attempts >= budget.get();
    match (flag, exhausted) {
        (ErrorFlag::Passed, _) => Ok(Route::Halt(HaltReason::Passed)),
        (ErrorFlag::Failed | ErrorFlag::Unresolved, true) => Ok(Route::Halt(HaltReason::Exhausted)),
        (ErrorFlag::Failed, false) => Ok(Route::Generate),
        (ErrorFlag::Unresolved, false) => Err(Error::invariant_violated(
            "routing reached with an unverified solution and budget remaining",
        )
        .with_operation("route::decide")
        .with_context("attempts", attempts.to_string())
        .with_context("budget", budget.to_string())),
    }
}
