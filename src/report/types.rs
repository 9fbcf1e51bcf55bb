//! Report kinds, per-kind schemas and the structured report model.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::patent::truncate_text;

/// Maximum length of the summary derived from the first section.
pub const SUMMARY_MAX_CHARS: usize = 200;

/// Marker merged into the first section of a salvaged report.
pub const INCOMPLETE_MARKER: &str =
    "[Incomplete] Generation did not finish; this report was built from partial output.";

/// One named, positional field of a report kind's persisted schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaField {
    /// Column the section content is stored in.
    pub column: &'static str,
    /// Header the full-tier prompt asks the model to emit.
    pub title: &'static str,
}

const MARKET_SCHEMA: &[SchemaField] = &[
    SchemaField {
        column: "market_penetration",
        title: "Market Penetration and Technology Adoption",
    },
    SchemaField {
        column: "competitive_landscape",
        title: "Competitive Landscape",
    },
    SchemaField {
        column: "market_growth_drivers",
        title: "Market Growth Drivers",
    },
    SchemaField {
        column: "risk_factors",
        title: "Risk Factors",
    },
];

const BUSINESS_SCHEMA: &[SchemaField] = &[
    SchemaField {
        column: "revenue_model",
        title: "Revenue Model",
    },
    SchemaField {
        column: "royalty_margin",
        title: "Royalty and Margin Structure",
    },
    SchemaField {
        column: "new_business_opportunities",
        title: "New Business Opportunities",
    },
    SchemaField {
        column: "competitor_response_strategy",
        title: "Competitor Response Strategy",
    },
];

/// Phrases that mark a section start in market output lacking header notation.
const MARKET_KEYED_PHRASES: &[&str] = &[
    "시장 규모 및 성장성",
    "시장 규모 및 성장 잠재력",
    "경쟁 환경 분석",
    "경쟁 환경 및 포지셔닝 전략",
    "전략적 포지셔닝",
    "핵심 기술 특징",
    "Market Size",
    "Market Opportunity",
];

/// Phrases that mark a section start in business output lacking header notation.
const BUSINESS_KEYED_PHRASES: &[&str] = &[
    "구체적인 신사업 제안",
    "최적의 수익 창출 경로",
    "전략적 기술 가치 추정",
    "최우선 R&D 후속 투자 방향",
    "전략적 파트너십/제휴 대상",
    "최악의 시나리오 대비 리스크 관리",
    "Strategic Partnerships",
    "Execution Roadmap",
    "Investment Recommendation",
];

/// Selects the prompt template, parsing hints and persisted schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Market,
    Business,
}

impl ReportKind {
    pub const ALL: [ReportKind; 2] = [ReportKind::Market, ReportKind::Business];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Market => "market",
            ReportKind::Business => "business",
        }
    }

    /// Human-readable report name, also the single-section fallback title.
    pub fn display_name(&self) -> &'static str {
        match self {
            ReportKind::Market => "Market Analysis Report",
            ReportKind::Business => "Business Insight Report",
        }
    }

    /// Positional schema: `sections[i]` is stored in `schema()[i].column`.
    pub fn schema(&self) -> &'static [SchemaField] {
        match self {
            ReportKind::Market => MARKET_SCHEMA,
            ReportKind::Business => BUSINESS_SCHEMA,
        }
    }

    pub fn keyed_phrases(&self) -> &'static [&'static str] {
        match self {
            ReportKind::Market => MARKET_KEYED_PHRASES,
            ReportKind::Business => BUSINESS_KEYED_PHRASES,
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a report kind string is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown report kind: '{0}'")]
pub struct UnknownReportKind(pub String);

impl FromStr for ReportKind {
    type Err = UnknownReportKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "market" | "market_analysis" => Ok(ReportKind::Market),
            "business" | "business_insight" | "business_insights" => Ok(ReportKind::Business),
            _ => Err(UnknownReportKind(s.to_string())),
        }
    }
}

/// A titled block of report content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSection {
    pub title: String,
    pub content: String,
    pub word_count: usize,
}

impl ReportSection {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let word_count = content.split_whitespace().count();
        Self {
            title: title.into(),
            content,
            word_count,
        }
    }

    /// Content length in characters.
    pub fn content_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// Size statistics over the final section list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetrics {
    pub total_sections: usize,
    pub total_content_length: usize,
    pub average_content_length: usize,
}

impl QualityMetrics {
    pub fn from_sections(sections: &[ReportSection]) -> Self {
        let total_content_length: usize = sections.iter().map(ReportSection::content_len).sum();
        let average_content_length = if sections.is_empty() {
            0
        } else {
            (total_content_length as f64 / sections.len() as f64).round() as usize
        };
        Self {
            total_sections: sections.len(),
            total_content_length,
            average_content_length,
        }
    }
}

/// Which parser heuristic produced the sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseTier {
    HeaderScan,
    SubHeader,
    ParagraphSplit,
    SentenceGroups,
    SingleSection,
}

/// Parsed report. Always holds at least one section with content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredReport {
    pub report_kind: ReportKind,
    pub report_name: String,
    pub sections: Vec<ReportSection>,
    pub summary: String,
    pub quality_metrics: QualityMetrics,
    pub parse_tier: ParseTier,
    pub is_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

impl StructuredReport {
    /// Content of the section at schema position `index`, or `""`.
    pub fn section_content(&self, index: usize) -> &str {
        self.sections
            .get(index)
            .map(|s| s.content.as_str())
            .unwrap_or("")
    }

    /// Pair each schema column with its positional section content.
    pub fn schema_fields(&self) -> Vec<(&'static str, &str)> {
        self.report_kind
            .schema()
            .iter()
            .enumerate()
            .map(|(i, field)| (field.column, self.section_content(i)))
            .collect()
    }

    /// Flag the report as built from partial output.
    ///
    /// The first section keeps its title; its content is prefixed with
    /// [`INCOMPLETE_MARKER`]. Metrics and summary are recomputed.
    pub fn into_salvaged(mut self, reason: impl Into<String>) -> Self {
        if let Some(first) = self.sections.first_mut() {
            if !first.content.starts_with(INCOMPLETE_MARKER) {
                *first = ReportSection::new(
                    first.title.clone(),
                    format!("{}\n\n{}", INCOMPLETE_MARKER, first.content),
                );
            }
        }
        self.is_fallback = true;
        self.fallback_reason = Some(reason.into());
        self.quality_metrics = QualityMetrics::from_sections(&self.sections);
        self.summary = summarize(&self.sections);
        self
    }
}

/// Build a short summary from the opening of the first section.
pub fn summarize(sections: &[ReportSection]) -> String {
    let Some(first) = sections.first() else {
        return String::new();
    };
    let flattened = first
        .content
        .lines()
        .map(|l| l.trim_start_matches(['#', '-', ' ']).replace("**", ""))
        .filter(|l| !l.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    truncate_text(flattened.trim(), SUMMARY_MAX_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_kind_parsing() {
        assert_eq!("market".parse::<ReportKind>().unwrap(), ReportKind::Market);
        assert_eq!(
            "market_analysis".parse::<ReportKind>().unwrap(),
            ReportKind::Market
        );
        assert_eq!(
            " Business-Insight ".parse::<ReportKind>().unwrap(),
            ReportKind::Business
        );
        let err = "patent".parse::<ReportKind>().unwrap_err();
        assert!(err.to_string().contains("patent"));
    }

    #[test]
    fn test_schemas_are_positional() {
        for kind in ReportKind::ALL {
            assert_eq!(kind.schema().len(), 4);
        }
        assert_eq!(ReportKind::Market.schema()[0].column, "market_penetration");
        assert_eq!(
            ReportKind::Business.schema()[3].column,
            "competitor_response_strategy"
        );
    }

    #[test]
    fn test_section_word_count() {
        let section = ReportSection::new("Title", "one two  three\nfour");
        assert_eq!(section.word_count, 4);
    }

    #[test]
    fn test_quality_metrics() {
        let sections = vec![ReportSection::new("a", "12345"), ReportSection::new("b", "123456")];
        let metrics = QualityMetrics::from_sections(&sections);
        assert_eq!(metrics.total_sections, 2);
        assert_eq!(metrics.total_content_length, 11);
        assert_eq!(metrics.average_content_length, 6);
        assert_eq!(QualityMetrics::from_sections(&[]).average_content_length, 0);
    }

    #[test]
    fn test_schema_fields_fill_missing_with_empty() {
        let report = StructuredReport {
            report_kind: ReportKind::Market,
            report_name: ReportKind::Market.display_name().to_string(),
            sections: vec![ReportSection::new("Only", "content")],
            summary: "content".into(),
            quality_metrics: QualityMetrics::default(),
            parse_tier: ParseTier::SingleSection,
            is_fallback: false,
            fallback_reason: None,
        };
        let fields = report.schema_fields();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[0], ("market_penetration", "content"));
        assert_eq!(fields[3], ("risk_factors", ""));
    }

    #[test]
    fn test_into_salvaged_marks_first_section_once() {
        let report = StructuredReport {
            report_kind: ReportKind::Business,
            report_name: "r".into(),
            sections: vec![ReportSection::new("A", "body a"), ReportSection::new("B", "body b")],
            summary: String::new(),
            quality_metrics: QualityMetrics::default(),
            parse_tier: ParseTier::HeaderScan,
            is_fallback: false,
            fallback_reason: None,
        };
        let salvaged = report.into_salvaged("partial_salvage").into_salvaged("partial_salvage");
        assert!(salvaged.is_fallback);
        assert_eq!(salvaged.fallback_reason.as_deref(), Some("partial_salvage"));
        assert_eq!(salvaged.sections[0].title, "A");
        assert_eq!(salvaged.sections[0].content.matches(INCOMPLETE_MARKER).count(), 1);
        assert!(salvaged.sections[0].content.ends_with("body a"));
        assert_eq!(salvaged.sections[1].content, "body b");
        assert_eq!(salvaged.quality_metrics.total_sections, 2);
    }

    #[test]
    fn test_summarize_strips_markup() {
        let sections = vec![ReportSection::new("t", "### Heading\n- **Growth** is 12%")];
        assert_eq!(summarize(&sections), "Heading Growth is 12%");
        assert_eq!(summarize(&[]), "");
    }
}
