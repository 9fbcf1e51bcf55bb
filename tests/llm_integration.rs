//! Integration tests against a live OpenAI-compatible endpoint.
//!
//! These tests make real API calls.
//! Run with: LLM_API_BASE=http://localhost:4000 LLM_API_KEY=key cargo test --test llm_integration -- --ignored

use std::sync::Arc;

use patent_report::classify::{ClassificationRequest, LlmTechFieldClassifier, TechFieldClassifier};
use patent_report::error::ErrorClass;
use patent_report::generation::CancelToken;
use patent_report::llm::{GenerationRequest, LiteLlmClient, LlmProvider, Message};
use patent_report::pipeline::{
    BudgetTier, OutcomeStatus, PipelineConfig, PipelineCoordinator, ReportRequest,
};

fn create_test_client() -> LiteLlmClient {
    LiteLlmClient::from_env()
        .expect("LLM_API_BASE environment variable must be set for integration tests")
}

#[tokio::test]
#[ignore] // Run with: cargo test --test llm_integration -- --ignored
async fn test_simple_generation() {
    let client = create_test_client();

    let request = GenerationRequest::new(
        "",
        vec![
            Message::system("You are a helpful assistant. Reply concisely."),
            Message::user("What is 2 + 2? Reply with just the number."),
        ],
    )
    .with_max_tokens(10)
    .with_temperature(0.0);

    let response = client.generate(request).await;
    assert!(response.is_ok(), "Generation failed: {:?}", response.err());

    let response = response.expect("Should have response");
    let content = response.first_content().expect("Should have content");
    assert!(
        content.contains('4'),
        "Response should contain '4', got: {}",
        content
    );
}

#[tokio::test]
#[ignore]
async fn test_bad_key_is_classified_as_auth() {
    let base = std::env::var("LLM_API_BASE").expect("LLM_API_BASE must be set");
    let client = LiteLlmClient::new(base, Some("sk-invalid".to_string()), "")
        .expect("client should build");

    let request = GenerationRequest::new("", vec![Message::user("Hello")]).with_max_tokens(5);
    let err = client
        .generate(request)
        .await
        .expect_err("an invalid key should be rejected");

    assert_eq!(err.class(), ErrorClass::Auth, "got: {}", err);
}

#[tokio::test]
#[ignore]
async fn test_llm_classifier_returns_known_field() {
    let classifier = LlmTechFieldClassifier::new(Arc::new(create_test_client()));
    let request = ClassificationRequest {
        text: "A lithium-ion battery management system that balances cell voltages".to_string(),
        ipc_codes: vec!["H01M 10/44".to_string()],
        cpc_codes: Vec::new(),
    };

    let classification = classifier
        .classify(&request)
        .await
        .expect("classification should succeed");
    assert!((0.0..=1.0).contains(&classification.confidence));
}

#[tokio::test]
#[ignore]
async fn test_constrained_pipeline_end_to_end() {
    let provider = Arc::new(create_test_client());
    let config = PipelineConfig::for_tier(BudgetTier::Constrained);
    let coordinator = PipelineCoordinator::new(config, provider).expect("valid config");

    let record = serde_json::json!({
        "applicationNumber": "1020230000001",
        "inventionTitle": "배터리 셀 전압 균등화 장치",
        "astrtCont": "복수의 배터리 셀 사이의 전압 편차를 감지하고 능동적으로 균등화하는 장치.",
        "ipcNumber": "H01M 10/44"
    });
    let request = ReportRequest::new(record, "market");

    let outcome = coordinator
        .run(&request, &CancelToken::new())
        .await
        .expect("pipeline should produce a report");

    assert_eq!(outcome.status, OutcomeStatus::Stateless);
    assert!(!outcome.response.sections.is_empty());
    assert_eq!(
        outcome.response.quality_metrics.total_sections,
        outcome.response.sections.len()
    );
}
