//! patent-report: structured market and business reports for patents.
//!
//! The pipeline normalizes a bibliographic record, renders a prompt for the
//! requested report kind, generates text under a retry budget, parses it into
//! sections and persists the result with per-requester deduplication.

pub mod classify;
pub mod cli;
pub mod error;
pub mod generation;
pub mod llm;
pub mod patent;
pub mod pipeline;
pub mod prompts;
pub mod report;
pub mod storage;

// Re-export commonly used error types
pub use error::{ClassifyError, ErrorClass, LlmError, PromptError};
pub use pipeline::{ErrorKind, PipelineCoordinator, PipelineFailure, ReportRequest};
