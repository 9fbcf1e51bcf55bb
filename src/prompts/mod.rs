//! LLM prompts for report generation.
//!
//! # Usage
//!
//! ```rust,ignore
//! use patent_report::pipeline::BudgetTier;
//! use patent_report::prompts::PromptBuilder;
//! use patent_report::report::ReportKind;
//!
//! let prompt = PromptBuilder::new(BudgetTier::Full).build(&info, ReportKind::Market)?;
//! let request = GenerationRequest::new("", prompt.into_messages());
//! ```

pub mod report;

pub use report::{PromptBuilder, ReportPrompt};
