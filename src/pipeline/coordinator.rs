//! End-to-end report pipeline.
//!
//! [`PipelineCoordinator`] runs normalize, prompt, generate, parse and
//! persist for one request and folds every intermediate error into the
//! outbound taxonomy ([`ErrorKind`]). A report that was generated is always
//! returned to the caller, even when it could not be saved; the only overall
//! failures are invalid input, fatal generation errors, cancellation, and
//! exhaustion without salvageable output.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::classify::{Classification, TechFieldClassifier};
use crate::error::ErrorClass;
use crate::generation::{CancelToken, FailureTerminal, GenerationFailure, GenerationOrchestrator};
use crate::llm::LlmProvider;
use crate::patent::{NormalizedPatentInfo, PatentInfoNormalizer};
use crate::prompts::PromptBuilder;
use crate::report::{
    parse_report, CacheKey, QualityMetrics, ReportCache, ReportKind, ReportSection,
    StructuredReport,
};
use crate::storage::{salvage_report, PersistError, PersistRequest, ReportPersister, ReportStore};

use super::config::{ConfigError, PipelineConfig};

/// `type` of the notification emitted after a report is saved.
pub const REPORT_GENERATED_EVENT: &str = "report_generated";

/// Outbound error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InputInvalid,
    AuthenticationFailure,
    QuotaExceeded,
    GenerationTimeout,
    TransientGenerationError,
    ParseQualityShortfall,
    Exhausted,
    PersistenceConflict,
    PersistenceTransientError,
    Unrecoverable,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InputInvalid => "INPUT_INVALID",
            ErrorKind::AuthenticationFailure => "AUTHENTICATION_FAILURE",
            ErrorKind::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorKind::GenerationTimeout => "GENERATION_TIMEOUT",
            ErrorKind::TransientGenerationError => "TRANSIENT_GENERATION_ERROR",
            ErrorKind::ParseQualityShortfall => "PARSE_QUALITY_SHORTFALL",
            ErrorKind::Exhausted => "EXHAUSTED",
            ErrorKind::PersistenceConflict => "PERSISTENCE_CONFLICT",
            ErrorKind::PersistenceTransientError => "PERSISTENCE_TRANSIENT_ERROR",
            ErrorKind::Unrecoverable => "UNRECOVERABLE",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }

    /// Kind reported for a generation failure class.
    pub fn from_class(class: ErrorClass) -> Self {
        match class {
            ErrorClass::Auth => ErrorKind::AuthenticationFailure,
            ErrorClass::Quota => ErrorKind::QuotaExceeded,
            ErrorClass::Timeout => ErrorKind::GenerationTimeout,
            ErrorClass::Transient | ErrorClass::Other => ErrorKind::TransientGenerationError,
            ErrorClass::QualityShortfall => ErrorKind::ParseQualityShortfall,
        }
    }

    /// HTTP-style status a transport layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::InputInvalid => 400,
            ErrorKind::AuthenticationFailure => 401,
            ErrorKind::QuotaExceeded => 429,
            ErrorKind::GenerationTimeout => 408,
            ErrorKind::TransientGenerationError
            | ErrorKind::Exhausted
            | ErrorKind::PersistenceTransientError => 503,
            ErrorKind::ParseQualityShortfall => 502,
            ErrorKind::PersistenceConflict => 409,
            ErrorKind::Unrecoverable => 500,
            ErrorKind::Cancelled => 499,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    /// Bibliographic record in whatever shape the caller has it.
    pub input_record: serde_json::Value,
    pub report_kind: String,
    /// Omitted for stateless runs that skip persistence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_id: Option<String>,
}

impl ReportRequest {
    pub fn new(input_record: serde_json::Value, report_kind: impl Into<String>) -> Self {
        Self {
            input_record,
            report_kind: report_kind.into(),
            requester_id: None,
        }
    }

    pub fn with_requester(mut self, requester_id: impl Into<String>) -> Self {
        self.requester_id = Some(requester_id.into());
        self
    }

    fn requester(&self) -> Option<&str> {
        self.requester_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Pipeline-level failure.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct PipelineFailure {
    pub kind: ErrorKind,
    pub message: String,
    /// Class of the last generation error when `kind` summarizes a retry loop.
    pub cause: Option<ErrorKind>,
    /// Whether an attempt produced any text before the run failed.
    pub has_partial_result: bool,
    pub attempts: u32,
}

impl PipelineFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            has_partial_result: false,
            attempts: 0,
        }
    }

    fn from_generation(failure: &GenerationFailure) -> Self {
        let (kind, cause) = match failure.terminal {
            FailureTerminal::Cancelled => (ErrorKind::Cancelled, None),
            FailureTerminal::Fatal => (ErrorKind::from_class(failure.class), None),
            FailureTerminal::Exhausted => (
                ErrorKind::Unrecoverable,
                Some(ErrorKind::from_class(failure.class)),
            ),
        };
        Self {
            kind,
            message: failure.to_string(),
            cause,
            has_partial_result: failure.partial_text.is_some(),
            attempts: failure.attempts,
        }
    }

    pub fn to_response(&self) -> FailureResponse {
        FailureResponse {
            error_kind: self.kind,
            cause: self.cause,
            message: self.message.clone(),
            status_code: self.kind.status_code(),
            timestamp: Utc::now(),
            has_partial_result: self.has_partial_result,
        }
    }
}

/// Outbound failure shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureResponse {
    pub error_kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<ErrorKind>,
    pub message: String,
    pub status_code: u16,
    pub timestamp: DateTime<Utc>,
    pub has_partial_result: bool,
}

/// Identity of the patent a report is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatentSummary {
    pub application_number: String,
    pub title: String,
}

/// Emitted for downstream listeners once a report is saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub report_id: Uuid,
    pub report_kind: ReportKind,
    pub timestamp: DateTime<Utc>,
}

/// Outbound success shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessResponse {
    /// Saved row, or the pre-existing row on a conflict. `None` when unsaved.
    pub report_id: Option<Uuid>,
    pub report_kind: ReportKind,
    pub report_name: String,
    pub sections: Vec<ReportSection>,
    pub summary: String,
    pub quality_metrics: QualityMetrics,
    pub is_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub patent_info: PatentSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub technology: Option<Classification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_event: Option<NotifyEvent>,
    pub attempts: u32,
}

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Generated and stored.
    Saved,
    /// Built from partial output after exhaustion, stored when possible.
    Salvaged,
    /// Generated without a requester; nothing stored.
    Stateless,
    /// Served from the stateless result cache.
    Cached,
    /// Generated, but storage failed.
    GeneratedNotSaved,
    /// An active report already exists for this requester, patent and kind.
    AlreadyGenerated,
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeStatus::Saved => write!(f, "saved"),
            OutcomeStatus::Salvaged => write!(f, "salvaged"),
            OutcomeStatus::Stateless => write!(f, "stateless"),
            OutcomeStatus::Cached => write!(f, "cached"),
            OutcomeStatus::GeneratedNotSaved => write!(f, "generated_not_saved"),
            OutcomeStatus::AlreadyGenerated => write!(f, "already_generated"),
        }
    }
}

/// Result of a run that produced a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutcome {
    pub status: OutcomeStatus,
    pub response: SuccessResponse,
    /// Degradation the caller should know about (salvage, conflict, storage).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<FailureResponse>,
}

/// Runs the whole report pipeline for one request at a time.
///
/// Holds no per-request state; share it behind an `Arc` to serve concurrent
/// requests.
pub struct PipelineCoordinator {
    config: PipelineConfig,
    normalizer: PatentInfoNormalizer,
    prompts: PromptBuilder,
    orchestrator: GenerationOrchestrator,
    persister: Option<ReportPersister>,
    cache: Option<Arc<dyn ReportCache>>,
}

impl PipelineCoordinator {
    /// Validates `config` and wires the generation side.
    pub fn new(config: PipelineConfig, provider: Arc<dyn LlmProvider>) -> Result<Self, ConfigError> {
        config.validate()?;

        let orchestrator = GenerationOrchestrator::new(provider, config.budget.clone())
            .with_model(config.model.clone())
            .with_min_output_chars(config.min_output_chars);

        Ok(Self {
            normalizer: PatentInfoNormalizer::new(config.budget.text_limits),
            prompts: PromptBuilder::new(config.budget.tier),
            orchestrator,
            persister: None,
            cache: None,
            config,
        })
    }

    /// Enable persistence with the configured dedup policy.
    pub fn with_store(
        mut self,
        store: Arc<dyn ReportStore>,
        classifier: Arc<dyn TechFieldClassifier>,
    ) -> Self {
        self.persister = Some(ReportPersister::new(
            store,
            classifier,
            self.config.persist.clone(),
        ));
        self
    }

    pub fn with_persister(mut self, persister: ReportPersister) -> Self {
        self.persister = Some(persister);
        self
    }

    /// Cache consulted for stateless requests.
    pub fn with_cache(mut self, cache: Arc<dyn ReportCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one request to completion, cancellation or failure.
    pub async fn run(
        &self,
        request: &ReportRequest,
        cancel: &CancelToken,
    ) -> Result<PipelineOutcome, PipelineFailure> {
        let started = Instant::now();

        let kind = ReportKind::from_str(&request.report_kind)
            .map_err(|e| PipelineFailure::new(ErrorKind::InputInvalid, e.to_string()))?;

        let info = self.normalizer.normalize(&request.input_record);
        if !info.has_substance() {
            return Err(PipelineFailure::new(
                ErrorKind::InputInvalid,
                "record has neither a title nor an abstract",
            ));
        }

        let requester = request.requester();
        if requester.is_some() && !info.has_application_number() {
            return Err(PipelineFailure::new(
                ErrorKind::InputInvalid,
                "record has no application number to save the report under",
            ));
        }

        tracing::info!(
            application_number = %info.application_number,
            report_kind = %kind,
            tier = %self.config.tier(),
            stateless = requester.is_none(),
            "Starting report pipeline"
        );

        // Records without an application number all normalize to the same
        // sentinel, so they are never cached.
        let cache_key = (requester.is_none() && info.has_application_number())
            .then(|| CacheKey::new(info.application_number.clone(), kind));
        if let Some(key) = &cache_key {
            if let Some(report) = self.cache.as_ref().and_then(|c| c.get(key)) {
                tracing::info!(key = %key, "Serving cached report");
                return Ok(PipelineOutcome {
                    status: OutcomeStatus::Cached,
                    response: success_response(report, &info, 0),
                    warning: None,
                });
            }
        }

        let prompt = self.prompts.build(&info, kind).map_err(|e| {
            tracing::error!(error = %e, "Prompt rendering failed");
            PipelineFailure::new(ErrorKind::Unrecoverable, e.to_string())
        })?;

        let (report, raw_text, attempts, salvage_warning) =
            match self.orchestrator.generate(&prompt, cancel).await {
                Ok(raw) => (parse_report(kind, &raw.text), raw.text, raw.attempts, None),
                Err(failure) => {
                    let salvageable = failure
                        .partial_text
                        .as_deref()
                        .filter(|text| text.chars().count() > self.config.salvage_min_chars);
                    match (failure.terminal, salvageable) {
                        (FailureTerminal::Exhausted, Some(partial)) => {
                            tracing::warn!(
                                attempts = failure.attempts,
                                partial_chars = partial.chars().count(),
                                error = %failure.message,
                                "Generation exhausted, salvaging partial output"
                            );
                            let warning = PipelineFailure {
                                kind: ErrorKind::Exhausted,
                                message: failure.to_string(),
                                cause: Some(ErrorKind::from_class(failure.class)),
                                has_partial_result: true,
                                attempts: failure.attempts,
                            };
                            (
                                salvage_report(kind, partial),
                                partial.to_string(),
                                failure.attempts,
                                Some(warning.to_response()),
                            )
                        }
                        _ => {
                            let pipeline_failure = PipelineFailure::from_generation(&failure);
                            tracing::error!(
                                error_kind = %pipeline_failure.kind,
                                attempts = failure.attempts,
                                elapsed_ms = started.elapsed().as_millis() as u64,
                                error = %failure.message,
                                "Report pipeline failed"
                            );
                            return Err(pipeline_failure);
                        }
                    }
                }
            };

        let outcome = match requester {
            None => self.finish_stateless(cache_key, report, &info, attempts, salvage_warning),
            Some(user_id) => {
                self.finish_persisted(user_id, report, &raw_text, &info, attempts, salvage_warning)
                    .await
            }
        };

        tracing::info!(
            status = %outcome.status,
            report_id = ?outcome.response.report_id,
            total_sections = outcome.response.quality_metrics.total_sections,
            attempts,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Report pipeline finished"
        );
        Ok(outcome)
    }

    fn finish_stateless(
        &self,
        key: Option<CacheKey>,
        report: StructuredReport,
        info: &NormalizedPatentInfo,
        attempts: u32,
        salvage_warning: Option<FailureResponse>,
    ) -> PipelineOutcome {
        let status = if report.is_fallback {
            OutcomeStatus::Salvaged
        } else {
            if let (Some(cache), Some(key)) = (&self.cache, key) {
                cache.set(key, report.clone());
            }
            OutcomeStatus::Stateless
        };

        PipelineOutcome {
            status,
            response: success_response(report, info, attempts),
            warning: salvage_warning,
        }
    }

    async fn finish_persisted(
        &self,
        user_id: &str,
        report: StructuredReport,
        raw_text: &str,
        info: &NormalizedPatentInfo,
        attempts: u32,
        salvage_warning: Option<FailureResponse>,
    ) -> PipelineOutcome {
        let Some(persister) = &self.persister else {
            tracing::warn!("Requester given but no report store is configured");
            let warning = PipelineFailure {
                has_partial_result: true,
                ..PipelineFailure::new(
                    ErrorKind::PersistenceTransientError,
                    "no report store is configured",
                )
            };
            return PipelineOutcome {
                status: OutcomeStatus::GeneratedNotSaved,
                response: success_response(report, info, attempts),
                warning: Some(warning.to_response()),
            };
        };

        let persisted = persister
            .persist(PersistRequest::new(user_id, info, &report, raw_text))
            .await;

        match persisted {
            Ok(saved) => {
                let status = if report.is_fallback {
                    OutcomeStatus::Salvaged
                } else {
                    OutcomeStatus::Saved
                };
                let mut response = success_response(report, info, attempts);
                response.report_id = Some(saved.report_id);
                response.technology = Some(saved.classification);
                response.notify_event = Some(NotifyEvent {
                    event_type: REPORT_GENERATED_EVENT.to_string(),
                    report_id: saved.report_id,
                    report_kind: response.report_kind,
                    timestamp: Utc::now(),
                });
                PipelineOutcome {
                    status,
                    response,
                    warning: salvage_warning,
                }
            }
            Err(PersistError::Conflict { existing_id }) => {
                let warning = PipelineFailure {
                    has_partial_result: true,
                    ..PipelineFailure::new(
                        ErrorKind::PersistenceConflict,
                        format!("report already generated: {}", existing_id),
                    )
                };
                let mut response = success_response(report, info, attempts);
                response.report_id = Some(existing_id);
                PipelineOutcome {
                    status: OutcomeStatus::AlreadyGenerated,
                    response,
                    warning: Some(warning.to_response()),
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Report generated but not saved");
                let warning = PipelineFailure {
                    has_partial_result: true,
                    ..PipelineFailure::new(ErrorKind::PersistenceTransientError, e.to_string())
                };
                PipelineOutcome {
                    status: OutcomeStatus::GeneratedNotSaved,
                    response: success_response(report, info, attempts),
                    warning: Some(warning.to_response()),
                }
            }
        }
    }
}

fn success_response(
    report: StructuredReport,
    info: &NormalizedPatentInfo,
    attempts: u32,
) -> SuccessResponse {
    SuccessResponse {
        report_id: None,
        report_kind: report.report_kind,
        report_name: report.report_name,
        sections: report.sections,
        summary: report.summary,
        quality_metrics: report.quality_metrics,
        is_fallback: report.is_fallback,
        fallback_reason: report.fallback_reason,
        generated_at: Utc::now(),
        patent_info: PatentSummary {
            application_number: info.application_number.clone(),
            title: info.invention_title.clone(),
        },
        technology: None,
        notify_event: None,
        attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::LocalTechFieldClassifier;
    use crate::error::LlmError;
    use crate::llm::{Choice, GenerationRequest, GenerationResponse, Message, Usage};
    use crate::pipeline::{BudgetTier, ExecutionBudget, DEFAULT_SALVAGE_MIN_CHARS};
    use crate::report::{InMemoryReportCache, INCOMPLETE_MARKER};
    use crate::storage::{
        NewReport, PersistedReport, ReportEvent, SqliteReportStore, StoreError,
    };
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    const REPORT_TEXT: &str = "## Market Penetration and Technology Adoption\n\
        Battery fleet operators are the first adopters of the device.\n\n\
        ## Competitive Landscape\n\
        Three incumbents hold most of the market but lack the claimed sensing loop.\n\n\
        ## Market Growth Drivers\n\
        Grid storage subsidies and EV volume growth drive demand.\n\n\
        ## Risk Factors\n\
        Certification timelines and raw material prices.";

    enum Step {
        Text(String),
        Fail(LlmError),
        Hang,
    }

    struct MockLlmProvider {
        steps: Mutex<VecDeque<Step>>,
        calls: AtomicU32,
    }

    impl MockLlmProvider {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlmProvider {
        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self
                .steps
                .lock()
                .expect("lock poisoned")
                .pop_front()
                .unwrap_or(Step::Hang);
            match step {
                Step::Text(content) => Ok(GenerationResponse {
                    id: "test-id".to_string(),
                    model: "test-model".to_string(),
                    choices: vec![Choice {
                        index: 0,
                        message: Message::assistant(content),
                        finish_reason: "stop".to_string(),
                    }],
                    usage: Usage::default(),
                }),
                Step::Fail(err) => Err(err),
                Step::Hang => std::future::pending().await,
            }
        }
    }

    /// Store whose inserts always fail with a non-retryable error.
    struct BrokenStore;

    #[async_trait]
    impl ReportStore for BrokenStore {
        async fn insert_report(&self, _report: &NewReport) -> Result<Uuid, StoreError> {
            Err(StoreError::Query("disk full".to_string()))
        }

        async fn find_active(
            &self,
            _user_id: &str,
            _application_number: &str,
            _kind: ReportKind,
        ) -> Result<Option<Uuid>, StoreError> {
            Ok(None)
        }

        async fn get_report(&self, _id: Uuid) -> Result<Option<PersistedReport>, StoreError> {
            Ok(None)
        }

        async fn delete_report(&self, id: Uuid) -> Result<(), StoreError> {
            Err(StoreError::NotFound(id.to_string()))
        }

        async fn insert_event(&self, _event: &ReportEvent) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn config() -> PipelineConfig {
        let mut budget = ExecutionBudget::for_tier(BudgetTier::Full);
        budget.attempt_deadline = Duration::from_secs(2);
        budget.deadline_step = Duration::ZERO;
        budget.base_backoff = Duration::from_millis(1);
        budget.max_backoff = Duration::from_millis(5);
        PipelineConfig::default().with_budget(budget)
    }

    fn record() -> serde_json::Value {
        serde_json::json!({
            "applicationNumber": "1020230000001",
            "title": "Example Device",
            "abstract": "A".repeat(50),
            "claims": "B".repeat(50)
        })
    }

    async fn store(dir: &TempDir) -> Arc<dyn ReportStore> {
        let path = dir.path().join("reports.db");
        Arc::new(
            SqliteReportStore::open(path.to_str().unwrap())
                .await
                .unwrap(),
        )
    }

    fn coordinator(provider: Arc<MockLlmProvider>) -> PipelineCoordinator {
        PipelineCoordinator::new(config(), provider).unwrap()
    }

    #[tokio::test]
    async fn test_saved_report_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let provider = MockLlmProvider::new(vec![Step::Text(REPORT_TEXT.to_string())]);
        let coordinator = coordinator(provider.clone())
            .with_store(store.clone(), Arc::new(LocalTechFieldClassifier));

        let request = ReportRequest::new(record(), "market").with_requester("user-1");
        let outcome = coordinator.run(&request, &CancelToken::new()).await.unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Saved);
        assert!(outcome.warning.is_none());
        let response = &outcome.response;
        assert_eq!(response.sections.len(), 4);
        assert_eq!(
            response.quality_metrics.total_sections,
            response.sections.len()
        );
        assert_eq!(response.patent_info.application_number, "1020230000001");
        let event = response.notify_event.as_ref().unwrap();
        assert_eq!(event.event_type, REPORT_GENERATED_EVENT);
        assert_eq!(Some(event.report_id), response.report_id);

        let stored = store
            .get_report(response.report_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.application_number, "1020230000001");
        assert!(stored.section_fields["risk_factors"].contains("Certification"));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_kind_is_input_invalid() {
        let provider = MockLlmProvider::new(vec![]);
        let err = coordinator(provider.clone())
            .run(&ReportRequest::new(record(), "forecast"), &CancelToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InputInvalid);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_record_is_input_invalid() {
        let provider = MockLlmProvider::new(vec![]);
        let err = coordinator(provider.clone())
            .run(
                &ReportRequest::new(serde_json::json!({}), "market"),
                &CancelToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InputInvalid);
        assert_eq!(err.to_response().status_code, 400);
    }

    #[tokio::test]
    async fn test_stateless_runs_use_the_cache() {
        let provider = MockLlmProvider::new(vec![Step::Text(REPORT_TEXT.to_string())]);
        let cache = Arc::new(InMemoryReportCache::new());
        let coordinator = coordinator(provider.clone()).with_cache(cache.clone());
        let request = ReportRequest::new(record(), "market");

        let first = coordinator.run(&request, &CancelToken::new()).await.unwrap();
        let second = coordinator.run(&request, &CancelToken::new()).await.unwrap();

        assert_eq!(first.status, OutcomeStatus::Stateless);
        assert!(first.response.report_id.is_none());
        assert_eq!(second.status, OutcomeStatus::Cached);
        assert_eq!(second.response.sections, first.response.sections);
        assert_eq!(provider.calls(), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_records_without_application_number_bypass_the_cache() {
        let provider = MockLlmProvider::new(vec![
            Step::Text(format!("## Market Penetration\nThis report concerns Alpha Widget. {REPORT_TEXT}")),
            Step::Text(format!("## Market Penetration\nThis report concerns Beta Gadget. {REPORT_TEXT}")),
        ]);
        let cache = Arc::new(InMemoryReportCache::new());
        let coordinator = coordinator(provider.clone()).with_cache(cache.clone());

        let alpha = ReportRequest::new(serde_json::json!({"title": "Alpha Widget"}), "market");
        let beta = ReportRequest::new(serde_json::json!({"title": "Beta Gadget"}), "market");
        let a = coordinator.run(&alpha, &CancelToken::new()).await.unwrap();
        let b = coordinator.run(&beta, &CancelToken::new()).await.unwrap();

        assert_eq!(a.status, OutcomeStatus::Stateless);
        assert_eq!(b.status, OutcomeStatus::Stateless);
        assert!(b.response.sections[0].content.contains("Beta Gadget"));
        assert!(!b.response.sections[0].content.contains("Alpha Widget"));
        assert_eq!(provider.calls(), 2);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_auth_failure_is_fatal() {
        let provider = MockLlmProvider::new(vec![Step::Fail(LlmError::Unauthorized(
            "bad key".to_string(),
        ))]);
        let err = coordinator(provider.clone())
            .run(&ReportRequest::new(record(), "market"), &CancelToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::AuthenticationFailure);
        assert_eq!(err.attempts, 1);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_without_partial_is_unrecoverable() {
        let provider = MockLlmProvider::new(vec![
            Step::Fail(LlmError::RequestFailed("connection reset".to_string())),
            Step::Fail(LlmError::RequestFailed("connection reset".to_string())),
            Step::Fail(LlmError::RequestFailed("connection reset".to_string())),
        ]);
        let err = coordinator(provider.clone())
            .run(&ReportRequest::new(record(), "market"), &CancelToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unrecoverable);
        assert_eq!(err.cause, Some(ErrorKind::TransientGenerationError));
        assert!(!err.has_partial_result);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_with_partial_is_salvaged_and_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let provider = MockLlmProvider::new(vec![
            Step::Text("Fleet operators are likely early adopters.".to_string()),
            Step::Fail(LlmError::RequestFailed("connection reset".to_string())),
            Step::Fail(LlmError::RequestFailed("connection reset".to_string())),
        ]);
        let coordinator = coordinator(provider)
            .with_store(store.clone(), Arc::new(LocalTechFieldClassifier));

        let request = ReportRequest::new(record(), "market").with_requester("user-1");
        let outcome = coordinator.run(&request, &CancelToken::new()).await.unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Salvaged);
        assert!(outcome.response.is_fallback);
        assert!(outcome.response.sections[0].content.starts_with(INCOMPLETE_MARKER));
        let warning = outcome.warning.unwrap();
        assert_eq!(warning.error_kind, ErrorKind::Exhausted);
        assert!(warning.has_partial_result);

        let stored = store
            .get_report(outcome.response.report_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(stored.is_fallback);
    }

    #[tokio::test]
    async fn test_salvage_needs_more_than_the_minimum() {
        let at_minimum = "Fleet operators lead";
        assert_eq!(at_minimum.chars().count(), DEFAULT_SALVAGE_MIN_CHARS);
        let fail = || Step::Fail(LlmError::RequestFailed("connection reset".to_string()));

        let provider = MockLlmProvider::new(vec![Step::Text(at_minimum.to_string()), fail(), fail()]);
        let err = coordinator(provider)
            .run(&ReportRequest::new(record(), "market"), &CancelToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unrecoverable);

        let provider = MockLlmProvider::new(vec![
            Step::Text(format!("{at_minimum}.")),
            fail(),
            fail(),
        ]);
        let outcome = coordinator(provider)
            .run(&ReportRequest::new(record(), "market"), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Salvaged);
    }

    #[tokio::test]
    async fn test_second_request_reports_existing_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let provider = MockLlmProvider::new(vec![
            Step::Text(REPORT_TEXT.to_string()),
            Step::Text(REPORT_TEXT.to_string()),
        ]);
        let coordinator =
            coordinator(provider).with_store(store, Arc::new(LocalTechFieldClassifier));
        let request = ReportRequest::new(record(), "market").with_requester("user-1");

        let first = coordinator.run(&request, &CancelToken::new()).await.unwrap();
        let second = coordinator.run(&request, &CancelToken::new()).await.unwrap();

        assert_eq!(second.status, OutcomeStatus::AlreadyGenerated);
        assert_eq!(second.response.report_id, first.response.report_id);
        let warning = second.warning.unwrap();
        assert_eq!(warning.error_kind, ErrorKind::PersistenceConflict);
        assert_eq!(warning.status_code, 409);
    }

    #[tokio::test]
    async fn test_storage_failure_still_returns_report() {
        let provider = MockLlmProvider::new(vec![Step::Text(REPORT_TEXT.to_string())]);
        let coordinator =
            coordinator(provider).with_store(Arc::new(BrokenStore), Arc::new(LocalTechFieldClassifier));
        let request = ReportRequest::new(record(), "business").with_requester("user-1");

        let outcome = coordinator.run(&request, &CancelToken::new()).await.unwrap();

        assert_eq!(outcome.status, OutcomeStatus::GeneratedNotSaved);
        assert!(outcome.response.report_id.is_none());
        assert!(!outcome.response.sections.is_empty());
        assert_eq!(
            outcome.warning.unwrap().error_kind,
            ErrorKind::PersistenceTransientError
        );
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_run() {
        let provider = MockLlmProvider::new(vec![Step::Hang]);
        let coordinator = coordinator(provider);
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = coordinator
            .run(&ReportRequest::new(record(), "market"), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }

    #[test]
    fn test_error_kind_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorKind::PersistenceTransientError).unwrap();
        assert_eq!(json, "\"PERSISTENCE_TRANSIENT_ERROR\"");
        assert_eq!(ErrorKind::QuotaExceeded.status_code(), 429);
        assert_eq!(
            ErrorKind::from_class(ErrorClass::QualityShortfall),
            ErrorKind::ParseQualityShortfall
        );
    }

    #[test]
    fn test_notify_event_uses_type_key() {
        let event = NotifyEvent {
            event_type: REPORT_GENERATED_EVENT.to_string(),
            report_id: Uuid::nil(),
            report_kind: ReportKind::Business,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "report_generated");
        assert_eq!(value["reportKind"], "business");
    }
}
