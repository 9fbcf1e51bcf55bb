//! Execution budgets per hosting tier.
//!
//! A budget fixes everything that bounds one generation run: attempt count,
//! per-attempt deadlines, backoff schedule, output ceiling, sampling and the
//! prompt's free-text limits. The worst-case wall clock of a budget is known
//! up front and checked against the host ceiling before any attempt starts.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::ConfigError;
use crate::error::ErrorClass;
use crate::patent::TextLimits;

/// Timeout-class failures back off longer than generic transient ones.
pub const TIMEOUT_BACKOFF_FACTOR: f64 = 1.5;

/// Upper bound on generation attempts accepted by validation.
pub const MAX_ATTEMPTS_LIMIT: u32 = 100;

/// Hosting tier the pipeline runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetTier {
    /// Short host ceiling: one attempt, short prompt, small output.
    Constrained,
    /// Generous host ceiling: retries and exhaustive prompts.
    #[default]
    Full,
}

impl BudgetTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetTier::Constrained => "constrained",
            BudgetTier::Full => "full",
        }
    }

    /// Default hard execution ceiling of hosts in this tier.
    pub fn default_host_ceiling(&self) -> Duration {
        match self {
            BudgetTier::Constrained => Duration::from_secs(60),
            BudgetTier::Full => Duration::from_secs(30 * 60),
        }
    }
}

impl std::fmt::Display for BudgetTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BudgetTier {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "constrained" | "hosted" | "serverless" => Ok(BudgetTier::Constrained),
            "full" | "local" => Ok(BudgetTier::Full),
            other => Err(ConfigError::InvalidValue {
                key: "REPORT_TIER".to_string(),
                message: format!("unknown tier '{}', expected constrained or full", other),
            }),
        }
    }
}

/// Sampling parameters passed with every generation request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_k: u32,
    pub top_p: f64,
}

/// Limits for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionBudget {
    pub tier: BudgetTier,
    pub max_attempts: u32,
    /// Deadline of the first attempt.
    pub attempt_deadline: Duration,
    /// Added to the deadline for every attempt after the first.
    pub deadline_step: Duration,
    pub base_backoff: Duration,
    pub backoff_growth: f64,
    pub max_backoff: Duration,
    pub max_output_tokens: u32,
    pub sampling: SamplingParams,
    pub text_limits: TextLimits,
}

impl ExecutionBudget {
    pub fn for_tier(tier: BudgetTier) -> Self {
        match tier {
            BudgetTier::Constrained => Self {
                tier,
                max_attempts: 1,
                attempt_deadline: Duration::from_secs(25),
                deadline_step: Duration::ZERO,
                base_backoff: Duration::ZERO,
                backoff_growth: 1.0,
                max_backoff: Duration::ZERO,
                max_output_tokens: 4096,
                sampling: SamplingParams {
                    temperature: 0.3,
                    top_k: 20,
                    top_p: 0.8,
                },
                text_limits: TextLimits {
                    abstract_max: 500,
                    claims_max: 600,
                },
            },
            BudgetTier::Full => Self {
                tier,
                max_attempts: 3,
                attempt_deadline: Duration::from_secs(300),
                deadline_step: Duration::from_secs(30),
                base_backoff: Duration::from_secs(2),
                backoff_growth: 2.0,
                max_backoff: Duration::from_secs(30),
                max_output_tokens: 8192,
                sampling: SamplingParams {
                    temperature: 0.7,
                    top_k: 40,
                    top_p: 0.95,
                },
                text_limits: TextLimits {
                    abstract_max: 1500,
                    claims_max: 2000,
                },
            },
        }
    }

    /// Deadline for the 1-based `attempt`, saturating at [`Duration::MAX`].
    pub fn deadline_for(&self, attempt: u32) -> Duration {
        self.checked_deadline_for(attempt).unwrap_or(Duration::MAX)
    }

    fn checked_deadline_for(&self, attempt: u32) -> Option<Duration> {
        self.deadline_step
            .checked_mul(attempt.saturating_sub(1))
            .and_then(|step| self.attempt_deadline.checked_add(step))
    }

    /// Delay after the 1-based `attempt` failed with `class`.
    ///
    /// `min(max_backoff, base * growth^(attempt-1) * scale)`, where `scale`
    /// is [`TIMEOUT_BACKOFF_FACTOR`] for timeouts and 1 otherwise.
    pub fn backoff_for(&self, attempt: u32, class: ErrorClass) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let mut secs = self.base_backoff.as_secs_f64() * self.backoff_growth.powi(exponent);
        if class == ErrorClass::Timeout {
            secs *= TIMEOUT_BACKOFF_FACTOR;
        }
        let capped = secs.min(self.max_backoff.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::try_from_secs_f64(capped)
                .map_or(self.max_backoff, |d| d.min(self.max_backoff))
        } else {
            Duration::ZERO
        }
    }

    /// Sum of all deadlines plus all timeout-scaled backoffs, saturating at
    /// [`Duration::MAX`].
    pub fn worst_case_wall_clock(&self) -> Duration {
        self.checked_wall_clock().unwrap_or(Duration::MAX)
    }

    /// Like [`worst_case_wall_clock`](Self::worst_case_wall_clock), `None` on overflow.
    pub fn checked_wall_clock(&self) -> Option<Duration> {
        let mut total = Duration::ZERO;
        for attempt in 1..=self.max_attempts {
            total = total.checked_add(self.checked_deadline_for(attempt)?)?;
            if attempt < self.max_attempts {
                total = total.checked_add(self.backoff_for(attempt, ErrorClass::Timeout))?;
            }
        }
        Some(total)
    }

    /// Check the budget is usable and fits under `host_ceiling`.
    pub fn validate(&self, host_ceiling: Duration) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.max_attempts > MAX_ATTEMPTS_LIMIT {
            return Err(ConfigError::ValidationFailed(format!(
                "max_attempts must be at most {}",
                MAX_ATTEMPTS_LIMIT
            )));
        }

        if self.attempt_deadline.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "attempt_deadline must be greater than 0".to_string(),
            ));
        }

        if self.backoff_growth < 1.0 || !self.backoff_growth.is_finite() {
            return Err(ConfigError::ValidationFailed(
                "backoff_growth must be at least 1.0".to_string(),
            ));
        }

        if self.max_output_tokens == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_output_tokens must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.sampling.temperature) {
            return Err(ConfigError::ValidationFailed(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.sampling.top_p) {
            return Err(ConfigError::ValidationFailed(
                "top_p must be between 0.0 and 1.0".to_string(),
            ));
        }

        let worst_case = self.checked_wall_clock().ok_or_else(|| {
            ConfigError::ValidationFailed(
                "worst-case wall clock overflows; reduce attempts or deadlines".to_string(),
            )
        })?;
        if worst_case > host_ceiling {
            return Err(ConfigError::ValidationFailed(format!(
                "worst-case wall clock {}s exceeds host ceiling {}s; reduce attempts or deadlines",
                worst_case.as_secs(),
                host_ceiling.as_secs()
            )));
        }

        Ok(())
    }
}

impl Default for ExecutionBudget {
    fn default() -> Self {
        Self::for_tier(BudgetTier::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constrained_preset() {
        let budget = ExecutionBudget::for_tier(BudgetTier::Constrained);
        assert_eq!(budget.max_attempts, 1);
        assert_eq!(budget.deadline_for(1), Duration::from_secs(25));
        assert_eq!(budget.max_output_tokens, 4096);
        assert_eq!(budget.text_limits.abstract_max, 500);
        assert_eq!(budget.worst_case_wall_clock(), Duration::from_secs(25));
        assert!(budget
            .validate(BudgetTier::Constrained.default_host_ceiling())
            .is_ok());
    }

    #[test]
    fn test_full_deadlines_grow() {
        let budget = ExecutionBudget::for_tier(BudgetTier::Full);
        assert_eq!(budget.deadline_for(1), Duration::from_secs(300));
        assert_eq!(budget.deadline_for(2), Duration::from_secs(330));
        assert_eq!(budget.deadline_for(3), Duration::from_secs(360));
    }

    #[test]
    fn test_backoff_schedule() {
        let budget = ExecutionBudget::for_tier(BudgetTier::Full);
        assert_eq!(
            budget.backoff_for(1, ErrorClass::Transient),
            Duration::from_secs(2)
        );
        assert_eq!(
            budget.backoff_for(2, ErrorClass::Transient),
            Duration::from_secs(4)
        );
        assert_eq!(
            budget.backoff_for(2, ErrorClass::Timeout),
            Duration::from_secs(6)
        );
        // Clamped after scaling.
        assert_eq!(
            budget.backoff_for(10, ErrorClass::Timeout),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_full_worst_case() {
        let budget = ExecutionBudget::for_tier(BudgetTier::Full);
        // 300 + 330 + 360 deadlines, 3 + 6 timeout backoffs
        assert_eq!(budget.worst_case_wall_clock(), Duration::from_secs(999));
        assert!(budget.validate(Duration::from_secs(1000)).is_ok());

        let err = budget.validate(Duration::from_secs(60)).unwrap_err();
        assert!(err.to_string().contains("host ceiling"));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut budget = ExecutionBudget::default();
        budget.max_attempts = 0;
        let err = budget.validate(Duration::from_secs(3600)).unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn test_overflowing_budget_is_rejected() {
        let mut budget = ExecutionBudget::for_tier(BudgetTier::Full);
        budget.attempt_deadline = Duration::from_secs(u64::MAX);

        assert_eq!(budget.deadline_for(2), Duration::MAX);
        assert_eq!(budget.worst_case_wall_clock(), Duration::MAX);
        assert!(budget.checked_wall_clock().is_none());
        let err = budget.validate(Duration::MAX).unwrap_err();
        assert!(err.to_string().contains("overflows"));

        let mut budget = ExecutionBudget::for_tier(BudgetTier::Full);
        budget.max_attempts = u32::MAX;
        let err = budget.validate(Duration::MAX).unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn test_huge_max_backoff_does_not_panic() {
        let mut budget = ExecutionBudget::for_tier(BudgetTier::Full);
        budget.base_backoff = Duration::MAX;
        budget.max_backoff = Duration::MAX;
        assert!(budget.backoff_for(3, ErrorClass::Timeout) <= Duration::MAX);
    }

    #[test]
    fn test_tier_from_str() {
        assert_eq!(
            "constrained".parse::<BudgetTier>().unwrap(),
            BudgetTier::Constrained
        );
        assert_eq!("FULL".parse::<BudgetTier>().unwrap(), BudgetTier::Full);
        assert!("medium".parse::<BudgetTier>().is_err());
    }
}
