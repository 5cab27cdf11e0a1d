//! Driver - sequences generation, verification and routing for one run
//!
//! The driver is pull-based: [`Driver::run`] returns a stream and nothing
//! happens until it is polled. Dropping the stream abandons the run, which
//! also kills any interpreter still running.

use crate::event::{Phase, RunEvent};
use crate::generate::generate;
use crate::route::{decide, HaltReason, Route};
use crate::state::{AttemptBudget, ErrorFlag, RunState};
use async_stream::stream;
use futures_core::Stream;
use futures_util::StreamExt;
use recoder_core::config::RunConfig;
use recoder_core::{CodeSolution, Error, Executor, ModelClient, Result, Verdict, Verifier};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One generation request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Overrides the driver's attempt budget
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Overrides whether `message` events are emitted
    #[serde(default)]
    pub verbose: Option<bool>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }
}

/// Final result of a drained run
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    /// Passing solution, or the last failing one when the budget ran out
    pub solution: Option<CodeSolution>,
    pub attempts: u32,
    pub success: bool,
    /// Set when the run ended with a fatal error
    pub error: Option<crate::event::ErrorEvent>,
    /// Every event, in order
    pub events: Vec<RunEvent>,
}

/// Runs the generate, verify, route loop
pub struct Driver<M: ModelClient, E: Executor> {
    model: M,
    verifier: Verifier<E>,
    budget: AttemptBudget,
    verbose: bool,
    message_limit: usize,
}

impl<M: ModelClient, E: Executor> Driver<M, E> {
    pub fn new(model: M, executor: E) -> Self {
        Self {
            model,
            verifier: Verifier::new(executor),
            budget: AttemptBudget::default(),
            verbose: true,
            message_limit: 500,
        }
    }

    /// Driver using the `[run]` section of the configuration
    pub fn from_config(model: M, executor: E, config: &RunConfig) -> Result<Self> {
        Ok(Self::new(model, executor)
            .with_budget(AttemptBudget::new(config.max_attempts)?)
            .with_verbose(config.verbose)
            .with_message_limit(config.message_limit))
    }

    pub fn with_budget(mut self, budget: AttemptBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_message_limit(mut self, limit: usize) -> Self {
        self.message_limit = limit;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn verifier(&self) -> &Verifier<E> {
        &self.verifier
    }

    pub fn budget(&self) -> AttemptBudget {
        self.budget
    }

    /// Start a run. Ends after exactly one `complete` or `error` event.
    pub fn run(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> impl Stream<Item = RunEvent> + '_ {
        stream! {
            let budget = match request.max_attempts.map(AttemptBudget::new).transpose() {
                Ok(budget) => budget.unwrap_or(self.budget),
                Err(err) => {
                    warn!(error = %err, "rejected attempt budget");
                    yield RunEvent::error(&err, 0);
                    return;
                }
            };
            if request.prompt.trim().is_empty() {
                let err = Error::invalid_argument("prompt must not be empty").with_operation("driver::run");
                yield RunEvent::error(&err, 0);
                return;
            }
            let verbose = request.verbose.unwrap_or(self.verbose);

            let mut state = RunState::new(request.prompt);
            let mut last_code: Option<CodeSolution> = None;
            info!(budget = budget.get(), verbose, "run started");
            yield RunEvent::status(Phase::Initializing, 0, budget);

            loop {
                if cancel.is_cancelled() {
                    yield RunEvent::error(&Error::cancelled("generation"), state.attempts());
                    return;
                }
                let generated = tokio::select! {
                    res = generate(&self.model, &mut state) => res,
                    _ = cancel.cancelled() => Err(Error::cancelled("generation")),
                };
                if let Err(err) = generated {
                    warn!(attempts = state.attempts(), error = %err, "generation failed");
                    yield RunEvent::error(&err, state.attempts());
                    return;
                }

                yield RunEvent::status(Phase::Generated, state.attempts(), budget);
                let solution = match state.solution() {
                    Some(solution) => solution.clone(),
                    None => {
                        let err = Error::invariant_violated("generation finished without a solution")
                            .with_operation("driver::run");
                        yield RunEvent::error(&err, state.attempts());
                        return;
                    }
                };
                if last_code.as_ref() != Some(&solution) {
                    last_code = Some(solution.clone());
                    yield RunEvent::Code(solution.clone());
                }
                if verbose {
                    if let Some(text) = state.latest_message() {
                        yield RunEvent::message(text, self.message_limit);
                    }
                }

                if cancel.is_cancelled() {
                    yield RunEvent::error(&Error::cancelled("verification"), state.attempts());
                    return;
                }
                let verdict = tokio::select! {
                    res = self.verifier.verify(&solution, &cancel) => res,
                    _ = cancel.cancelled() => Err(Error::cancelled("verification")),
                };
                match verdict {
                    Ok(Verdict::Passed) => state.mark_passed(),
                    Ok(Verdict::Failed(failure)) => {
                        info!(attempts = state.attempts(), stage = %failure.stage, "attempt failed verification");
                        state.record_failure(&failure);
                    }
                    Err(err) => {
                        warn!(attempts = state.attempts(), error = %err, "verification aborted");
                        yield RunEvent::error(&err, state.attempts());
                        return;
                    }
                }

                let route = match decide(state.flag(), state.attempts(), budget) {
                    Ok(route) => route,
                    Err(err) => {
                        yield RunEvent::error(&err, state.attempts());
                        return;
                    }
                };
                let phase = match route {
                    Route::Halt(reason) => Phase::from(reason),
                    Route::Generate => Phase::Retrying,
                };
                yield RunEvent::status(phase, state.attempts(), budget);
                if verbose && state.flag() == ErrorFlag::Failed {
                    if let Some(text) = state.latest_message() {
                        yield RunEvent::message(text, self.message_limit);
                    }
                }

                if let Route::Halt(reason) = route {
                    let success = reason == HaltReason::Passed;
                    info!(attempts = state.attempts(), success, "run finished");
                    yield RunEvent::complete(solution, state.attempts(), success);
                    return;
                }
            }
        }
    }

    /// Drain a run into its final outcome
    pub async fn run_to_completion(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let events = self.run(request, cancel);
        futures_util::pin_mut!(events);

        let mut outcome = RunOutcome::default();
        while let Some(event) = events.next().await {
            match &event {
                RunEvent::Complete(done) => {
                    outcome.solution = Some(done.solution.clone());
                    outcome.attempts = done.total_attempts;
                    outcome.success = done.success;
                }
                RunEvent::Error(err) => {
                    outcome.attempts = err.attempts;
                    outcome.error = Some(err.clone());
                }
                _ => {}
            }
            outcome.events.push(event);
        }
        outcome
    }
}
