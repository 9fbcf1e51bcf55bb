//! Report pipeline: configuration, execution budgets and the coordinator.
//!
//! # Pipeline Flow
//!
//! 1. **Normalize**: the inbound record becomes a flat, fully-defined patent record
//! 2. **Prompt**: a tier-specific prompt is rendered for the report kind
//! 3. **Generate**: the generation service is called under the execution budget
//! 4. **Parse**: raw text becomes an ordered list of titled sections
//! 5. **Persist**: the report is deduplicated, classified and stored (skipped
//!    for stateless requests)
//!
//! # Example
//!
//! ```rust,ignore
//! use patent_report::generation::CancelToken;
//! use patent_report::pipeline::{PipelineConfig, PipelineCoordinator, ReportRequest};
//!
//! let config = PipelineConfig::from_env()?;
//! let coordinator = PipelineCoordinator::new(config, provider)?
//!     .with_store(store, classifier);
//!
//! let request = ReportRequest::new(record, "market").with_requester("user-1");
//! match coordinator.run(&request, &CancelToken::new()).await {
//!     Ok(outcome) => println!("{}: {:?}", outcome.status, outcome.response.report_id),
//!     Err(failure) => eprintln!("{}", failure),
//! }
//! ```
//!
//! # Budgets
//!
//! Two tiers are built in. `constrained` makes a single short attempt sized
//! for serverless hosts; `full` retries with growing deadlines. The worst-case
//! wall clock of a budget is validated against the host ceiling up front.

pub mod budget;
pub mod config;
pub mod coordinator;

pub use budget::{
    BudgetTier, ExecutionBudget, SamplingParams, MAX_ATTEMPTS_LIMIT, TIMEOUT_BACKOFF_FACTOR,
};
pub use config::{ConfigError, PipelineConfig, DEFAULT_SALVAGE_MIN_CHARS};
pub use coordinator::{
    ErrorKind, FailureResponse, NotifyEvent, OutcomeStatus, PatentSummary, PipelineCoordinator,
    PipelineFailure, PipelineOutcome, ReportRequest, SuccessResponse, REPORT_GENERATED_EVENT,
};
