//! Deadline-racing generation loop with classified retries.
//!
//! Each attempt races the provider call against the attempt deadline and a
//! caller cancellation signal. The losing futures are dropped, which aborts
//! an in-flight HTTP request instead of letting it run on unobserved.
//! Attempts are strictly sequential and separated by backoff sleeps that are
//! themselves cancellable.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::ErrorClass;
use crate::llm::{GenerationRequest, LlmProvider};
use crate::pipeline::ExecutionBudget;
use crate::prompts::ReportPrompt;

/// Outputs shorter than this (trimmed, in chars) fail the quality gate.
pub const DEFAULT_MIN_OUTPUT_CHARS: usize = 100;

/// Cloneable cancellation signal shared between a caller and the loop.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called on any clone.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            // Sender is owned by every clone, so this only happens on teardown.
            std::future::pending::<()>().await;
        }
    }
}

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed(ErrorClass),
}

/// Record of one attempt, kept only while the loop runs.
#[derive(Debug, Clone)]
pub struct GenerationAttempt {
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
    pub elapsed_ms: u64,
}

/// Retry loop states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Attempting(u32),
    Retrying { next_attempt: u32, delay: Duration },
    Succeeded,
    FailedFatal,
    FailedExhausted,
}

impl OrchestratorState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestratorState::Succeeded
                | OrchestratorState::FailedFatal
                | OrchestratorState::FailedExhausted
        )
    }
}

/// Transition out of `Attempting(attempt)` given how the attempt ended.
pub fn next_state(
    budget: &ExecutionBudget,
    attempt: u32,
    outcome: AttemptOutcome,
) -> OrchestratorState {
    match outcome {
        AttemptOutcome::Succeeded => OrchestratorState::Succeeded,
        AttemptOutcome::Failed(class) if class.is_fatal() => OrchestratorState::FailedFatal,
        AttemptOutcome::Failed(_) if attempt >= budget.max_attempts => {
            OrchestratorState::FailedExhausted
        }
        AttemptOutcome::Failed(class) => OrchestratorState::Retrying {
            next_attempt: attempt + 1,
            delay: budget.backoff_for(attempt, class),
        },
    }
}

/// Output of a successful generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawGenerationResult {
    pub text: String,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Why the loop stopped without a usable result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureTerminal {
    /// Auth or quota failure; no retries were spent.
    Fatal,
    /// Every attempt failed.
    Exhausted,
    /// The caller cancelled.
    Cancelled,
}

impl std::fmt::Display for FailureTerminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureTerminal::Fatal => write!(f, "failed fatally"),
            FailureTerminal::Exhausted => write!(f, "exhausted retries"),
            FailureTerminal::Cancelled => write!(f, "was cancelled"),
        }
    }
}

/// Generation failed; carries the last classified error.
#[derive(Debug, Clone, Error)]
#[error("Generation {terminal} after {attempts} attempt(s): {message}")]
pub struct GenerationFailure {
    pub terminal: FailureTerminal,
    pub class: ErrorClass,
    pub message: String,
    pub attempts: u32,
    pub elapsed: Duration,
    /// Longest text an attempt returned before failing the quality gate.
    pub partial_text: Option<String>,
}

/// Runs one report generation under an [`ExecutionBudget`].
pub struct GenerationOrchestrator {
    provider: Arc<dyn LlmProvider>,
    budget: ExecutionBudget,
    model: String,
    min_output_chars: usize,
}

impl GenerationOrchestrator {
    pub fn new(provider: Arc<dyn LlmProvider>, budget: ExecutionBudget) -> Self {
        Self {
            provider,
            budget,
            model: String::new(),
            min_output_chars: DEFAULT_MIN_OUTPUT_CHARS,
        }
    }

    /// Model passed with each request; empty uses the provider default.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_min_output_chars(mut self, min: usize) -> Self {
        self.min_output_chars = min;
        self
    }

    pub fn budget(&self) -> &ExecutionBudget {
        &self.budget
    }

    fn build_request(&self, prompt: &ReportPrompt) -> GenerationRequest {
        let sampling = self.budget.sampling;
        GenerationRequest::new(self.model.clone(), prompt.clone().into_messages())
            .with_temperature(sampling.temperature)
            .with_top_p(sampling.top_p)
            .with_top_k(sampling.top_k)
            .with_max_tokens(self.budget.max_output_tokens)
    }

    /// Run the retry loop until success, a fatal error, exhaustion or cancellation.
    pub async fn generate(
        &self,
        prompt: &ReportPrompt,
        cancel: &CancelToken,
    ) -> Result<RawGenerationResult, GenerationFailure> {
        let request = self.build_request(prompt);
        let started = Instant::now();
        let mut history: Vec<GenerationAttempt> = Vec::new();
        let mut partial_text: Option<String> = None;
        let mut last_error = (ErrorClass::Other, String::from("no attempt was made"));
        let mut state = OrchestratorState::Attempting(1);

        let failure = |terminal, class, message: String, attempts, partial| GenerationFailure {
            terminal,
            class,
            message,
            attempts,
            elapsed: started.elapsed(),
            partial_text: partial,
        };

        loop {
            let attempt = match state {
                OrchestratorState::Attempting(n) => n,
                OrchestratorState::Retrying {
                    next_attempt,
                    delay,
                } => {
                    tracing::info!(
                        next_attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Backing off before retry"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Err(failure(
                                FailureTerminal::Cancelled,
                                last_error.0,
                                "cancelled during backoff".to_string(),
                                next_attempt - 1,
                                partial_text,
                            ));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    state = OrchestratorState::Attempting(next_attempt);
                    continue;
                }
                OrchestratorState::Succeeded
                | OrchestratorState::FailedFatal
                | OrchestratorState::FailedExhausted
                | OrchestratorState::Idle => break,
            };

            let deadline = self.budget.deadline_for(attempt);
            tracing::info!(
                attempt,
                max_attempts = self.budget.max_attempts,
                deadline_secs = deadline.as_secs_f64(),
                "Starting generation attempt"
            );

            let attempt_started = Instant::now();
            let raced = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = tokio::time::timeout(deadline, self.provider.generate(request.clone())) => Some(result),
            };
            let elapsed_ms = attempt_started.elapsed().as_millis() as u64;

            let Some(raced) = raced else {
                tracing::warn!(attempt, elapsed_ms, "Generation cancelled by caller");
                return Err(failure(
                    FailureTerminal::Cancelled,
                    last_error.0,
                    "cancelled during attempt".to_string(),
                    attempt,
                    partial_text,
                ));
            };

            let outcome = match raced {
                Err(_) => {
                    last_error = (
                        ErrorClass::Timeout,
                        format!("attempt {} exceeded its {}s deadline", attempt, deadline.as_secs()),
                    );
                    AttemptOutcome::Failed(ErrorClass::Timeout)
                }
                Ok(Err(err)) => {
                    let class = err.class();
                    last_error = (class, err.to_string());
                    AttemptOutcome::Failed(class)
                }
                Ok(Ok(response)) => {
                    let text = response.first_content().unwrap_or("").trim().to_string();
                    let len = text.chars().count();
                    if len >= self.min_output_chars {
                        history.push(GenerationAttempt {
                            attempt_number: attempt,
                            outcome: AttemptOutcome::Succeeded,
                            elapsed_ms,
                        });
                        tracing::info!(
                            attempt,
                            elapsed_ms,
                            output_chars = len,
                            "Generation attempt succeeded"
                        );
                        return Ok(RawGenerationResult {
                            text,
                            attempts: attempt,
                            elapsed: started.elapsed(),
                        });
                    }
                    last_error = (
                        ErrorClass::QualityShortfall,
                        format!(
                            "output of {} chars is under the {} char minimum",
                            len, self.min_output_chars
                        ),
                    );
                    if len > partial_text.as_ref().map_or(0, |p| p.chars().count()) {
                        partial_text = Some(text);
                    }
                    AttemptOutcome::Failed(ErrorClass::QualityShortfall)
                }
            };

            history.push(GenerationAttempt {
                attempt_number: attempt,
                outcome,
                elapsed_ms,
            });
            tracing::warn!(
                attempt,
                elapsed_ms,
                class = ?last_error.0,
                error = %last_error.1,
                "Generation attempt failed"
            );

            state = next_state(&self.budget, attempt, outcome);
            match state {
                OrchestratorState::FailedFatal => {
                    tracing::error!(attempt, class = ?last_error.0, "Fatal generation error, not retrying");
                    return Err(failure(
                        FailureTerminal::Fatal,
                        last_error.0,
                        last_error.1,
                        attempt,
                        partial_text,
                    ));
                }
                OrchestratorState::FailedExhausted => {
                    let timeouts = history
                        .iter()
                        .filter(|a| a.outcome == AttemptOutcome::Failed(ErrorClass::Timeout))
                        .count();
                    tracing::error!(
                        attempts = attempt,
                        timeouts,
                        has_partial = partial_text.is_some(),
                        "Generation attempts exhausted"
                    );
                    return Err(failure(
                        FailureTerminal::Exhausted,
                        last_error.0,
                        last_error.1,
                        attempt,
                        partial_text,
                    ));
                }
                _ => {}
            }
        }

        Err(failure(
            FailureTerminal::Exhausted,
            last_error.0,
            last_error.1,
            history.len() as u32,
            partial_text,
        ))
    }
}
