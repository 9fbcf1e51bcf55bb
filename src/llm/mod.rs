//! LLM integration for report generation.
//!
//! The pipeline only depends on the [`LlmProvider`] trait; [`LiteLlmClient`]
//! is the production implementation for OpenAI-compatible endpoints.
//!
//! ```ignore
//! use patent_report::llm::{LiteLlmClient, LlmProvider, Message, GenerationRequest};
//!
//! let client = LiteLlmClient::from_env()?;
//! let request = GenerationRequest::new("", vec![Message::user("Hello!")])
//!     .with_temperature(0.7)
//!     .with_top_k(40);
//! let response = client.generate(request).await?;
//! ```

pub mod litellm;

pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage,
    DEFAULT_MODEL,
};
