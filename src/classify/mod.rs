//! Technology-field classification of a patent.
//!
//! The persister asks a [`TechFieldClassifier`] for a field label and falls
//! back to [`classify_locally`] when the classifier errors or times out.
//! The local mapping looks at IPC/CPC prefixes first, then keywords.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ClassifyError;
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::patent::{NormalizedPatentInfo, NO_DATA, NO_TITLE};

/// Confidence assigned to a classification-code prefix match.
pub const CODE_MATCH_CONFIDENCE: f64 = 0.8;
/// Confidence assigned to a keyword match.
pub const KEYWORD_MATCH_CONFIDENCE: f64 = 0.7;
/// Confidence assigned when nothing matched.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Fixed set of technology fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TechField {
    #[serde(rename = "AI")]
    Ai,
    #[serde(rename = "IoT")]
    Iot,
    Bio,
    Auto,
    Semiconductor,
    Energy,
    Materials,
    Communication,
    Software,
    Other,
}

impl TechField {
    pub const ALL: [TechField; 10] = [
        TechField::Ai,
        TechField::Iot,
        TechField::Bio,
        TechField::Auto,
        TechField::Semiconductor,
        TechField::Energy,
        TechField::Materials,
        TechField::Communication,
        TechField::Software,
        TechField::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TechField::Ai => "AI",
            TechField::Iot => "IoT",
            TechField::Bio => "Bio",
            TechField::Auto => "Auto",
            TechField::Semiconductor => "Semiconductor",
            TechField::Energy => "Energy",
            TechField::Materials => "Materials",
            TechField::Communication => "Communication",
            TechField::Software => "Software",
            TechField::Other => "Other",
        }
    }

    /// Case-insensitive label lookup; unrecognized labels map to `Other`.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|field| field.as_str().eq_ignore_ascii_case(label))
            .unwrap_or(TechField::Other)
    }
}

impl fmt::Display for TechField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A field label with a confidence in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub field: TechField,
    pub confidence: f64,
}

impl Classification {
    pub fn new(field: TechField, confidence: f64) -> Self {
        Self {
            field,
            confidence: if confidence.is_finite() {
                confidence.clamp(0.0, 1.0)
            } else {
                DEFAULT_CONFIDENCE
            },
        }
    }
}

/// Input to a classifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationRequest {
    pub text: String,
    pub ipc_codes: Vec<String>,
    pub cpc_codes: Vec<String>,
}

impl ClassificationRequest {
    /// Seed a request with the title, abstract and codes of a patent.
    pub fn from_patent(info: &NormalizedPatentInfo) -> Self {
        let mut parts = Vec::new();
        if info.invention_title != NO_TITLE {
            parts.push(info.invention_title.as_str());
        }
        if info.abstract_text != NO_DATA {
            parts.push(info.abstract_text.as_str());
        }
        Self {
            text: parts.join("\n"),
            ipc_codes: info.ipc_code_list(),
            cpc_codes: info.cpc_code_list(),
        }
    }
}

/// External classification collaborator.
#[async_trait]
pub trait TechFieldClassifier: Send + Sync {
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<Classification, ClassifyError>;
}

/// Classification-code prefixes, most specific first.
const CODE_PREFIXES: &[(&str, TechField)] = &[
    ("G06N", TechField::Ai),
    ("G06V", TechField::Ai),
    ("G10L", TechField::Ai),
    ("H01L", TechField::Semiconductor),
    ("H10", TechField::Semiconductor),
    ("G11C", TechField::Semiconductor),
    ("H01M", TechField::Energy),
    ("H02", TechField::Energy),
    ("Y02E", TechField::Energy),
    ("F03D", TechField::Energy),
    ("G16Y", TechField::Iot),
    ("H04W4", TechField::Iot),
    ("H04", TechField::Communication),
    ("H01Q", TechField::Communication),
    ("A61", TechField::Bio),
    ("C12", TechField::Bio),
    ("G16H", TechField::Bio),
    ("B60", TechField::Auto),
    ("B62D", TechField::Auto),
    ("G05D1", TechField::Auto),
    ("G06F", TechField::Software),
    ("G06Q", TechField::Software),
    ("B82", TechField::Materials),
    ("C", TechField::Materials),
];

/// Keywords per field, checked in order.
const KEYWORDS: &[(TechField, &[&str])] = &[
    (
        TechField::Ai,
        &[
            "ai",
            "인공지능",
            "머신러닝",
            "딥러닝",
            "신경망",
            "machine learning",
            "deep learning",
            "neural",
            "artificial intelligence",
        ],
    ),
    (
        TechField::Iot,
        &["iot", "사물인터넷", "센서", "스마트홈", "sensor", "smart home", "wearable"],
    ),
    (
        TechField::Bio,
        &["바이오", "의료", "유전자", "bio", "medical", "gene", "pharmaceutical"],
    ),
    (
        TechField::Auto,
        &[
            "자동차",
            "자율주행",
            "전기차",
            "automotive",
            "vehicle",
            "autonomous driving",
        ],
    ),
    (
        TechField::Semiconductor,
        &["반도체", "프로세서", "semiconductor", "chip", "wafer", "transistor"],
    ),
    (
        TechField::Energy,
        &["에너지", "태양광", "배터리", "연료전지", "energy", "solar", "battery", "fuel cell"],
    ),
    (
        TechField::Materials,
        &["소재", "나노", "복합재료", "material", "nanomaterial", "composite", "polymer"],
    ),
    (
        TechField::Communication,
        &["통신", "네트워크", "5g", "network", "wireless", "antenna"],
    ),
    (
        TechField::Software,
        &["소프트웨어", "플랫폼", "software", "platform", "application program"],
    ),
];

fn word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-z0-9]+").expect("Invalid word regex"))
}

fn code_matches(code: &str) -> Option<TechField> {
    let normalized: String = code
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();
    if normalized.is_empty() {
        return None;
    }
    CODE_PREFIXES
        .iter()
        .find(|(prefix, _)| normalized.starts_with(prefix))
        .map(|(_, field)| *field)
}

fn keyword_matches(text: &str) -> Option<TechField> {
    let lower = text.to_lowercase();
    let words: HashSet<&str> = word_regex()
        .find_iter(&lower)
        .map(|m| m.as_str())
        .collect();

    KEYWORDS
        .iter()
        .find(|(_, keywords)| {
            keywords.iter().any(|kw| {
                if kw.is_ascii() && !kw.contains(' ') {
                    words.contains(kw)
                } else {
                    lower.contains(kw)
                }
            })
        })
        .map(|(field, _)| *field)
}

/// Deterministic local classification used when the classifier fails.
pub fn classify_locally(request: &ClassificationRequest) -> Classification {
    if let Some(field) = request
        .ipc_codes
        .iter()
        .chain(request.cpc_codes.iter())
        .find_map(|code| code_matches(code))
    {
        return Classification::new(field, CODE_MATCH_CONFIDENCE);
    }

    if let Some(field) = keyword_matches(&request.text) {
        return Classification::new(field, KEYWORD_MATCH_CONFIDENCE);
    }

    Classification::new(TechField::Other, DEFAULT_CONFIDENCE)
}

/// Classifier that is itself deterministic and infallible.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTechFieldClassifier;

#[async_trait]
impl TechFieldClassifier for LocalTechFieldClassifier {
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<Classification, ClassifyError> {
        Ok(classify_locally(request))
    }
}

const CLASSIFIER_SYSTEM: &str = "You classify patents into technology fields. \
Respond with a single JSON object and nothing else.";

#[derive(Debug, Deserialize)]
struct RawClassification {
    field: Option<String>,
    confidence: Option<f64>,
}

/// Asks the generation service for a `{"field","confidence"}` object.
pub struct LlmTechFieldClassifier {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl LlmTechFieldClassifier {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            model: String::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn build_prompt(request: &ClassificationRequest) -> String {
        let fields: Vec<&str> = TechField::ALL.iter().map(TechField::as_str).collect();
        let codes = |codes: &[String]| {
            if codes.is_empty() {
                "none".to_string()
            } else {
                codes.join(", ")
            }
        };
        format!(
            "Classify the patent below into exactly one of these fields: {}.\n\n\
             IPC codes: {}\nCPC codes: {}\n\nText:\n{}\n\n\
             Answer as JSON: {{\"field\": \"<field>\", \"confidence\": <0.0-1.0>}}",
            fields.join(", "),
            codes(&request.ipc_codes),
            codes(&request.cpc_codes),
            request.text
        )
    }
}

/// Pull the first balanced JSON object out of free text.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a classifier answer into a [`Classification`].
pub fn parse_classification(content: &str) -> Result<Classification, ClassifyError> {
    let json = extract_json_object(content).ok_or_else(|| {
        ClassifyError::InvalidResponse(format!(
            "no JSON object in response: {}",
            content.chars().take(100).collect::<String>()
        ))
    })?;
    let raw: RawClassification = serde_json::from_str(json)
        .map_err(|e| ClassifyError::InvalidResponse(e.to_string()))?;
    let field = raw
        .field
        .as_deref()
        .map(TechField::from_label)
        .unwrap_or(TechField::Other);
    Ok(Classification::new(field, raw.confidence.unwrap_or(0.8)))
}

#[async_trait]
impl TechFieldClassifier for LlmTechFieldClassifier {
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<Classification, ClassifyError> {
        let generation = GenerationRequest::new(
            self.model.clone(),
            vec![
                Message::system(CLASSIFIER_SYSTEM),
                Message::user(Self::build_prompt(request)),
            ],
        )
        .with_temperature(0.1)
        .with_max_tokens(200);

        let response = self.provider.generate(generation).await?;
        let content = response
            .first_content()
            .ok_or_else(|| ClassifyError::InvalidResponse("empty response".to_string()))?;
        let classification = parse_classification(content)?;
        tracing::debug!(
            field = %classification.field,
            confidence = classification.confidence,
            "Classifier answered"
        );
        Ok(classification)
    }
}
