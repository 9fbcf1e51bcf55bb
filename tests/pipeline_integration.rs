//! End-to-end pipeline tests over SQLite with scripted generation providers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use patent_report::classify::LocalTechFieldClassifier;
use patent_report::error::LlmError;
use patent_report::generation::CancelToken;
use patent_report::llm::{
    Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage,
};
use patent_report::patent::{normalize_patent_info, PatentInfoNormalizer, TextLimits};
use patent_report::pipeline::{
    BudgetTier, ErrorKind, ExecutionBudget, OutcomeStatus, PipelineConfig, PipelineCoordinator,
    ReportRequest,
};
use patent_report::report::{parse_report, ReportKind};
use patent_report::storage::{ReportStore, SqliteReportStore};
use tempfile::TempDir;

const MARKET_TEXT: &str = "## Market Penetration and Technology Adoption\n\
    Fleet operators adopt first because the device cuts pack replacement costs.\n\n\
    ## Competitive Landscape\n\
    Incumbent suppliers rely on passive balancing and cannot match the efficiency.\n\n\
    ## Market Growth Drivers\n\
    Grid storage build-out and EV volume growth.\n\n\
    ## Risk Factors\n\
    Certification timelines and cell chemistry shifts.";

enum Step {
    Text(String),
    Fail(LlmError),
    Hang,
}

/// Plays back a fixed script of responses; hangs once the script runs out.
struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
}

impl ScriptedProvider {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            calls: AtomicU32::new(0),
        })
    }

    fn repeating_text(text: &str, times: usize) -> Arc<Self> {
        Self::new((0..times).map(|_| Step::Text(text.to_string())).collect())
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate(&self, _request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .steps
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .unwrap_or(Step::Hang);
        match step {
            Step::Text(content) => Ok(GenerationResponse {
                id: "scripted".to_string(),
                model: "scripted-model".to_string(),
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

fn scenario_record() -> serde_json::Value {
    serde_json::json!({
        "applicationNumber": "1020230000001",
        "title": "Example Device",
        "abstract": "A".repeat(50),
        "claims": "B".repeat(50)
    })
}

fn fast_budget() -> ExecutionBudget {
    let mut budget = ExecutionBudget::for_tier(BudgetTier::Full);
    budget.attempt_deadline = Duration::from_secs(5);
    budget.deadline_step = Duration::ZERO;
    budget.base_backoff = Duration::from_millis(1);
    budget.max_backoff = Duration::from_millis(5);
    budget
}

async fn open_store(dir: &TempDir) -> Arc<SqliteReportStore> {
    let path = dir.path().join("reports.db");
    Arc::new(
        SqliteReportStore::open(path.to_str().unwrap())
            .await
            .unwrap(),
    )
}

fn persisting_coordinator(
    provider: Arc<ScriptedProvider>,
    store: Arc<SqliteReportStore>,
) -> PipelineCoordinator {
    PipelineCoordinator::new(PipelineConfig::default().with_budget(fast_budget()), provider)
        .unwrap()
        .with_store(store, Arc::new(LocalTechFieldClassifier))
}

async fn row_count(store: &SqliteReportStore) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM report_records")
        .fetch_one(store.pool())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_market_scenario_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let provider = ScriptedProvider::repeating_text(MARKET_TEXT, 1);
    let coordinator = persisting_coordinator(provider, store.clone());

    let request = ReportRequest::new(scenario_record(), "market").with_requester("user-1");
    let outcome = coordinator.run(&request, &CancelToken::new()).await.unwrap();

    assert_eq!(outcome.status, OutcomeStatus::Saved);
    let response = outcome.response;
    assert!(!response.sections.is_empty());
    assert_eq!(
        response.quality_metrics.total_sections,
        response.sections.len()
    );

    let stored = store
        .get_report(response.report_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.application_number, "1020230000001");
    assert_eq!(stored.report.sections, response.sections);
    assert_eq!(stored.name, "Market Analysis Report: Example Device");
}

#[tokio::test]
async fn test_concurrent_duplicates_store_one_row() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let provider = ScriptedProvider::repeating_text(MARKET_TEXT, 2);
    let coordinator = persisting_coordinator(provider, store.clone());
    let request = ReportRequest::new(scenario_record(), "market").with_requester("user-1");

    let cancel_a = CancelToken::new();
    let cancel_b = CancelToken::new();
    let (a, b) = tokio::join!(
        coordinator.run(&request, &cancel_a),
        coordinator.run(&request, &cancel_b)
    );
    let mut statuses = vec![a.unwrap().status, b.unwrap().status];
    statuses.sort_by_key(|s| s.to_string());

    assert_eq!(
        statuses,
        vec![OutcomeStatus::AlreadyGenerated, OutcomeStatus::Saved]
    );
    assert_eq!(row_count(&store).await, 1);
}

#[tokio::test]
async fn test_different_requesters_and_kinds_do_not_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let provider = ScriptedProvider::repeating_text(MARKET_TEXT, 3);
    let coordinator = persisting_coordinator(provider, store.clone());

    for (user, kind) in [("user-1", "market"), ("user-2", "market"), ("user-1", "business")] {
        let request = ReportRequest::new(scenario_record(), kind).with_requester(user);
        let outcome = coordinator.run(&request, &CancelToken::new()).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Saved, "{user}/{kind}");
    }
    assert_eq!(row_count(&store).await, 3);
}

#[tokio::test]
async fn test_partial_output_is_salvaged_after_exhaustion() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let provider = ScriptedProvider::new(vec![
        Step::Fail(LlmError::ApiError {
            code: 503,
            message: "overloaded".to_string(),
        }),
        Step::Text("Early adopters are fleet operators.".to_string()),
        Step::Fail(LlmError::Timeout("read timed out".to_string())),
    ]);
    let coordinator = persisting_coordinator(provider.clone(), store.clone());

    let request = ReportRequest::new(scenario_record(), "market").with_requester("user-1");
    let outcome = coordinator.run(&request, &CancelToken::new()).await.unwrap();

    assert_eq!(outcome.status, OutcomeStatus::Salvaged);
    assert_eq!(provider.calls(), 3);
    let warning = outcome.warning.unwrap();
    assert_eq!(warning.error_kind, ErrorKind::Exhausted);
    assert_eq!(warning.cause, Some(ErrorKind::GenerationTimeout));

    let stored = store
        .get_report(outcome.response.report_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(stored.is_fallback);
    assert!(stored.report.is_fallback);
}

#[tokio::test]
async fn test_quota_error_short_circuits() {
    let provider = ScriptedProvider::new(vec![Step::Fail(LlmError::RateLimited(
        "quota exceeded".to_string(),
    ))]);
    let coordinator =
        PipelineCoordinator::new(PipelineConfig::default().with_budget(fast_budget()), provider.clone())
            .unwrap();

    let err = coordinator
        .run(
            &ReportRequest::new(scenario_record(), "business"),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::QuotaExceeded);
    assert_eq!(err.to_response().status_code, 429);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_exhaust_within_the_budget() {
    let budget = ExecutionBudget::for_tier(BudgetTier::Full);
    let expected_deadlines: Duration = (1..=budget.max_attempts)
        .map(|n| budget.deadline_for(n))
        .sum();
    let worst_case = budget.worst_case_wall_clock();

    let provider = ScriptedProvider::new(vec![Step::Hang, Step::Hang, Step::Hang]);
    let coordinator =
        PipelineCoordinator::new(PipelineConfig::default(), provider.clone()).unwrap();

    let started = tokio::time::Instant::now();
    let err = coordinator
        .run(
            &ReportRequest::new(scenario_record(), "market"),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(err.kind, ErrorKind::Unrecoverable);
    assert_eq!(err.cause, Some(ErrorKind::GenerationTimeout));
    assert_eq!(provider.calls(), budget.max_attempts);
    assert!(elapsed >= expected_deadlines, "{elapsed:?}");
    assert!(elapsed <= worst_case + Duration::from_millis(50), "{elapsed:?}");
}

#[tokio::test]
async fn test_constrained_tier_makes_one_attempt() {
    let provider = ScriptedProvider::new(vec![Step::Fail(LlmError::ApiError {
        code: 502,
        message: "bad gateway".to_string(),
    })]);
    let coordinator = PipelineCoordinator::new(
        PipelineConfig::for_tier(BudgetTier::Constrained),
        provider.clone(),
    )
    .unwrap();

    let err = coordinator
        .run(
            &ReportRequest::new(scenario_record(), "market"),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Unrecoverable);
    assert_eq!(provider.calls(), 1);
}

#[test]
fn test_normalizer_is_total_over_malformed_records() {
    let inputs = [
        serde_json::Value::Null,
        serde_json::json!([]),
        serde_json::json!("just a string"),
        serde_json::json!({"patentData": null}),
        serde_json::json!({"biblioSummaryInfoArray": {"biblioSummaryInfo": []}}),
        serde_json::json!({"title": 42, "abstract": {"nested": true}, "ipcCodes": [null, 3]}),
    ];
    let normalizer = PatentInfoNormalizer::new(TextLimits::default());

    for input in &inputs {
        let info = normalizer.normalize(input);
        assert!(!info.application_number.is_empty(), "{input}");
        assert!(!info.invention_title.is_empty(), "{input}");
        assert!(!info.abstract_text.is_empty(), "{input}");
        assert!(!info.claims.is_empty(), "{input}");
    }
}

#[test]
fn test_scenario_record_normalizes() {
    let info = normalize_patent_info(&scenario_record());
    assert_eq!(info.application_number, "1020230000001");
    assert_eq!(info.invention_title, "Example Device");
    assert_eq!(info.abstract_text, "A".repeat(50));
}

#[test]
fn test_parser_is_total_over_arbitrary_text() {
    let inputs = [
        String::new(),
        "   \n\n  ".to_string(),
        "x".to_string(),
        "## \n##\n**".to_string(),
        "한 문장. 두 문장. 세 문장. 네 문장. 다섯 문장.".to_string(),
        "word ".repeat(500),
        MARKET_TEXT.to_string(),
    ];

    for kind in ReportKind::ALL {
        for input in &inputs {
            let report = parse_report(kind, input);
            assert!(!report.sections.is_empty());
            assert!(report
                .sections
                .iter()
                .all(|s| !s.content.trim().is_empty()));
            assert_eq!(report.quality_metrics.total_sections, report.sections.len());
        }
    }
}
