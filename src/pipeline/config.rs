//! Pipeline configuration.
//!
//! Configuration starts from the [`ExecutionBudget`] preset of the selected
//! tier; individual environment variables then override single limits.

use std::time::Duration;
use thiserror::Error;

use super::budget::{BudgetTier, ExecutionBudget};
use crate::generation::DEFAULT_MIN_OUTPUT_CHARS;
use crate::storage::{ConflictPolicy, PersistConfig};

/// Minimum length of partial output worth salvaging.
pub const DEFAULT_SALVAGE_MIN_CHARS: usize = 20;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for the report pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Limits for generation and prompt rendering.
    pub budget: ExecutionBudget,
    /// Hard wall-clock ceiling of the host; the budget must fit under it.
    pub host_ceiling: Duration,
    /// Model passed to the generation service; empty uses the client default.
    pub model: String,
    /// Shorter outputs fail the quality gate and are retried.
    pub min_output_chars: usize,
    /// Partial output longer than this is salvaged on exhaustion.
    pub salvage_min_chars: usize,
    /// Dedup policy and insert retries.
    pub persist: PersistConfig,
    /// Store URL; `None` runs every request statelessly.
    pub database_url: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::for_tier(BudgetTier::default())
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults for `tier`, including its host ceiling.
    pub fn for_tier(tier: BudgetTier) -> Self {
        Self {
            budget: ExecutionBudget::for_tier(tier),
            host_ceiling: tier.default_host_ceiling(),
            model: String::new(),
            min_output_chars: DEFAULT_MIN_OUTPUT_CHARS,
            salvage_min_chars: DEFAULT_SALVAGE_MIN_CHARS,
            persist: PersistConfig::default(),
            database_url: None,
        }
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `REPORT_TIER`: `constrained` or `full` (default: full)
    /// - `REPORT_MODEL`: Model name sent to the generation service
    /// - `REPORT_ATTEMPT_TIMEOUT_SECS`: Deadline of the first attempt
    /// - `REPORT_ATTEMPT_TIMEOUT_STEP_SECS`: Deadline growth per attempt
    /// - `REPORT_MAX_ATTEMPTS`: Generation attempts
    /// - `REPORT_BASE_BACKOFF_MS`: First retry delay
    /// - `REPORT_MAX_BACKOFF_MS`: Retry delay ceiling
    /// - `REPORT_MAX_OUTPUT_TOKENS`: Output token ceiling
    /// - `REPORT_ABSTRACT_MAX_LEN`: Abstract truncation length
    /// - `REPORT_CLAIMS_MAX_LEN`: Claims truncation length
    /// - `REPORT_HOST_CEILING_SECS`: Host execution ceiling
    /// - `REPORT_MIN_OUTPUT_CHARS`: Quality gate (default: 100)
    /// - `REPORT_SALVAGE_MIN_CHARS`: Partial output must be longer than this to be salvaged (default: 20)
    /// - `REPORT_ALLOW_REPLACE`: Replace existing reports instead of rejecting (default: false)
    /// - `REPORT_PERSIST_ATTEMPTS`: Insert attempts (default: 3)
    /// - `DATABASE_URL`: `sqlite:` or `postgres://` URL; unset means stateless
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if variables have invalid values or the
    /// resulting budget does not fit the host ceiling.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let tier = match lookup("REPORT_TIER") {
            Some(val) => val.parse::<BudgetTier>()?,
            None => BudgetTier::default(),
        };
        let mut config = Self::for_tier(tier);

        // Generation settings
        if let Some(val) = lookup("REPORT_MODEL") {
            config.model = val;
        }

        if let Some(val) = lookup("REPORT_ATTEMPT_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "REPORT_ATTEMPT_TIMEOUT_SECS")?;
            config.budget.attempt_deadline = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("REPORT_ATTEMPT_TIMEOUT_STEP_SECS") {
            let secs: u64 = parse_env_value(&val, "REPORT_ATTEMPT_TIMEOUT_STEP_SECS")?;
            config.budget.deadline_step = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("REPORT_MAX_ATTEMPTS") {
            config.budget.max_attempts = parse_env_value(&val, "REPORT_MAX_ATTEMPTS")?;
        }

        if let Some(val) = lookup("REPORT_BASE_BACKOFF_MS") {
            let ms: u64 = parse_env_value(&val, "REPORT_BASE_BACKOFF_MS")?;
            config.budget.base_backoff = Duration::from_millis(ms);
        }

        if let Some(val) = lookup("REPORT_MAX_BACKOFF_MS") {
            let ms: u64 = parse_env_value(&val, "REPORT_MAX_BACKOFF_MS")?;
            config.budget.max_backoff = Duration::from_millis(ms);
        }

        if let Some(val) = lookup("REPORT_MAX_OUTPUT_TOKENS") {
            config.budget.max_output_tokens = parse_env_value(&val, "REPORT_MAX_OUTPUT_TOKENS")?;
        }

        // Prompt limits
        if let Some(val) = lookup("REPORT_ABSTRACT_MAX_LEN") {
            config.budget.text_limits.abstract_max =
                parse_env_value(&val, "REPORT_ABSTRACT_MAX_LEN")?;
        }

        if let Some(val) = lookup("REPORT_CLAIMS_MAX_LEN") {
            config.budget.text_limits.claims_max = parse_env_value(&val, "REPORT_CLAIMS_MAX_LEN")?;
        }

        if let Some(val) = lookup("REPORT_HOST_CEILING_SECS") {
            let secs: u64 = parse_env_value(&val, "REPORT_HOST_CEILING_SECS")?;
            config.host_ceiling = Duration::from_secs(secs);
        }

        // Quality and salvage
        if let Some(val) = lookup("REPORT_MIN_OUTPUT_CHARS") {
            config.min_output_chars = parse_env_value(&val, "REPORT_MIN_OUTPUT_CHARS")?;
        }

        if let Some(val) = lookup("REPORT_SALVAGE_MIN_CHARS") {
            config.salvage_min_chars = parse_env_value(&val, "REPORT_SALVAGE_MIN_CHARS")?;
        }

        // Persistence
        if let Some(val) = lookup("REPORT_ALLOW_REPLACE") {
            if parse_env_bool(&val, "REPORT_ALLOW_REPLACE")? {
                config.persist.conflict_policy = ConflictPolicy::ReplaceExisting;
            }
        }

        if let Some(val) = lookup("REPORT_PERSIST_ATTEMPTS") {
            config.persist.insert_attempts = parse_env_value(&val, "REPORT_PERSIST_ATTEMPTS")?;
        }

        config.database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.budget.validate(self.host_ceiling)?;

        if self.min_output_chars == 0 {
            return Err(ConfigError::ValidationFailed(
                "min_output_chars must be greater than 0".to_string(),
            ));
        }

        if self.salvage_min_chars == 0 {
            return Err(ConfigError::ValidationFailed(
                "salvage_min_chars must be greater than 0".to_string(),
            ));
        }

        if self.salvage_min_chars > self.min_output_chars {
            return Err(ConfigError::ValidationFailed(
                "salvage_min_chars cannot exceed min_output_chars".to_string(),
            ));
        }

        if self.persist.insert_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "persist insert_attempts must be greater than 0".to_string(),
            ));
        }

        if let Some(url) = &self.database_url {
            if !(url.starts_with("sqlite:")
                || url.starts_with("postgres://")
                || url.starts_with("postgresql://"))
            {
                return Err(ConfigError::ValidationFailed(format!(
                    "database_url must be a sqlite: or postgres:// URL, got '{}'",
                    url
                )));
            }
        }

        Ok(())
    }

    pub fn tier(&self) -> BudgetTier {
        self.budget.tier
    }

    /// Builder method to replace the execution budget.
    pub fn with_budget(mut self, budget: ExecutionBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Builder method to set the host ceiling.
    pub fn with_host_ceiling(mut self, ceiling: Duration) -> Self {
        self.host_ceiling = ceiling;
        self
    }

    /// Builder method to set the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Builder method to set the quality gate.
    pub fn with_min_output_chars(mut self, min: usize) -> Self {
        self.min_output_chars = min;
        self
    }

    /// Builder method to set the salvage threshold.
    pub fn with_salvage_min_chars(mut self, min: usize) -> Self {
        self.salvage_min_chars = min;
        self
    }

    /// Builder method to set persistence settings.
    pub fn with_persist(mut self, persist: PersistConfig) -> Self {
        self.persist = persist;
        self
    }

    /// Builder method to set the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.persist.conflict_policy = policy;
        self
    }

    /// Builder method to set database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
