//! Report text generation under an execution budget.
//!
//! ```rust,ignore
//! use patent_report::generation::{CancelToken, GenerationOrchestrator};
//! use patent_report::pipeline::{BudgetTier, ExecutionBudget};
//!
//! let orchestrator = GenerationOrchestrator::new(provider, ExecutionBudget::for_tier(BudgetTier::Full));
//! let raw = orchestrator.generate(&prompt, &CancelToken::new()).await?;
//! println!("{} chars after {} attempt(s)", raw.text.len(), raw.attempts);
//! ```

pub mod orchestrator;

pub use orchestrator::{
    next_state, AttemptOutcome, CancelToken, FailureTerminal, GenerationAttempt,
    GenerationFailure, GenerationOrchestrator, OrchestratorState, RawGenerationResult,
    DEFAULT_MIN_OUTPUT_CHARS,
};
