//! Error types shared across the report pipeline.
//!
//! Subsystem-specific errors live next to their subsystem
//! (`storage::StoreError`, `pipeline::ConfigError`, ...); this module holds
//! the generation-service errors and the classification the retry loop
//! acts on.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure classes the generation retry loop distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Bad or missing credentials. Never retried.
    Auth,
    /// Quota exhausted or rate limited. Never retried.
    Quota,
    /// The attempt deadline elapsed first.
    Timeout,
    /// Network or service hiccup.
    Transient,
    /// The call succeeded but the output was empty or too short.
    QualityShortfall,
    /// Anything unclassified; retried like a transient error.
    Other,
}

impl ErrorClass {
    /// Auth and quota failures end the retry loop immediately.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorClass::Auth | ErrorClass::Quota)
    }
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: LLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LlmError {
    /// Map this error onto the retry loop's failure classes.
    pub fn class(&self) -> ErrorClass {
        match self {
            LlmError::Unauthorized(_) | LlmError::MissingApiBase => ErrorClass::Auth,
            LlmError::QuotaExceeded(_) | LlmError::RateLimited(_) => ErrorClass::Quota,
            LlmError::Timeout(_) => ErrorClass::Timeout,
            LlmError::RequestFailed(msg) => classify_message(msg).unwrap_or(ErrorClass::Transient),
            LlmError::ApiError { code, message } => match code {
                401 | 403 => ErrorClass::Auth,
                429 => ErrorClass::Quota,
                408 | 504 => ErrorClass::Timeout,
                500..=599 => ErrorClass::Transient,
                _ => classify_message(message).unwrap_or(ErrorClass::Other),
            },
            LlmError::ParseError(msg) => classify_message(msg).unwrap_or(ErrorClass::Other),
            LlmError::Io(_) => ErrorClass::Transient,
        }
    }
}

/// Recognize auth and quota failures that arrive as free text.
fn classify_message(message: &str) -> Option<ErrorClass> {
    let lower = message.to_lowercase();
    if ["api_key", "api key", "authentication", "unauthorized", "permission denied"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        return Some(ErrorClass::Auth);
    }
    if ["quota", "rate limit", "too many requests", "429"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        return Some(ErrorClass::Quota);
    }
    if lower.contains("timed out") || lower.contains("timeout") {
        return Some(ErrorClass::Timeout);
    }
    None
}

/// Errors raised while rendering prompts.
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Tera template rendering error: {0}")]
    Tera(#[from] tera::Error),
}

/// Errors raised by technology-field classifiers.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("Classifier LLM call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Classifier response could not be parsed: {0}")]
    InvalidResponse(String),

    #[error("Classifier timed out after {0} ms")]
    Timeout(u64),
}
