//! # recoder Agent
//!
//! The agent runs the self-correcting loop:
//! 1. User provides a prompt
//! 2. The model generates a solution (description, imports, body)
//! 3. The verifier runs the imports, then imports + body, out of process
//! 4. On failure the error goes back into the conversation and we loop
//! 5. Until the code runs cleanly or the attempt budget is spent
//!
//! Every transition is reported as a [`RunEvent`] on a pull-based stream.

mod driver;
mod event;
mod generate;
mod route;
mod state;

pub use driver::{Driver, GenerationRequest, RunOutcome};
pub use event::{CompleteEvent, ErrorEvent, Phase, RunEvent, StatusEvent};
pub use generate::generate;
pub use route::{decide, HaltReason, Route};
pub use state::{AttemptBudget, ErrorFlag, RunState, DEFAULT_MAX_ATTEMPTS};
