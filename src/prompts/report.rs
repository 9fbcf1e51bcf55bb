//! Prompt rendering for market and business reports.
//!
//! Two templates per budget tier. The full tier lists every section header
//! the parser's header scan looks for, in schema order; the constrained tier
//! drops claims and party details and keeps instructions short so the answer
//! fits the smaller output ceiling.

use tera::{Context, Tera};

use crate::error::PromptError;
use crate::llm::Message;
use crate::patent::{NormalizedPatentInfo, NO_DATA};
use crate::pipeline::BudgetTier;
use crate::report::ReportKind;

const FULL_SYSTEM: &str = "You are a senior partner at a top-tier strategy consultancy who \
specializes in patent commercialization. You write rigorous, quantified, executive-ready \
analyses in Markdown.";

const CONSTRAINED_SYSTEM: &str =
    "You are a patent commercialization analyst. Answer in concise Markdown.";

const FULL_TEMPLATE: &str = r#"# {{ report_name }}: {{ title }}

Prepare a {{ report_name }} for the board of a company evaluating the patent below.

## Patent Summary
- Application number: {{ application_number }}
- Title: {{ title }}{% if title_eng %} ({{ title_eng }}){% endif %}
- Application date / status: {{ application_date }} / {{ register_status }}
- IPC: {{ ipc_codes }}
- Applicants: {{ applicants }}
- Inventors: {{ inventors }}

### Abstract
{{ abstract_text }}

### Representative Claims
{{ claims }}

## Analysis Focus
{% for item in focus %}- {{ item }}
{% endfor %}
## Required Output Format
Write the report in Markdown using exactly these section headers, in this order, each on its own line:
{% for section in sections %}
## {{ section }}
{% endfor %}
Under each header write at least two substantive paragraphs. Quantify wherever possible
(market sizes, growth rates as percentages, time frames in years). Do not add other
top-level headers, a preamble, or closing remarks.
"#;

const CONSTRAINED_TEMPLATE: &str = r#"Write a concise {{ report_name }} for patent {{ application_number }} "{{ title }}".

Abstract: {{ abstract_text }}
IPC: {{ ipc_codes }}

Use these Markdown headers in order: {% for section in sections %}## {{ section }}{% if not loop.last %}; {% endif %}{% endfor %}.
One short paragraph per section with key figures.
"#;

const MARKET_FOCUS: &[&str] = &[
    "Market size and growth potential of the addressable segments",
    "Competitive environment, substitute technologies and incumbent positions",
    "Adoption barriers and the pace of technology penetration",
    "Strategic positioning and the strength of the claimed scope",
];

const BUSINESS_FOCUS: &[&str] = &[
    "At least three concrete new business proposals built on the patent",
    "Optimal revenue paths: direct commercialization, licensing, or sale",
    "Royalty rates and margin structure benchmarks for the field",
    "Strategic partners and how competitors are likely to respond",
    "Execution roadmap in stages with principal risks and mitigations",
];

/// System and user messages for one report generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPrompt {
    pub system: String,
    pub user: String,
}

impl ReportPrompt {
    pub fn into_messages(self) -> Vec<Message> {
        vec![Message::system(self.system), Message::user(self.user)]
    }
}

/// Renders report prompts for one budget tier.
#[derive(Debug, Clone, Copy)]
pub struct PromptBuilder {
    tier: BudgetTier,
}

impl PromptBuilder {
    pub fn new(tier: BudgetTier) -> Self {
        Self { tier }
    }

    pub fn tier(&self) -> BudgetTier {
        self.tier
    }

    /// Render the prompt. Output depends only on the arguments and the tier.
    pub fn build(
        &self,
        info: &NormalizedPatentInfo,
        kind: ReportKind,
    ) -> Result<ReportPrompt, PromptError> {
        let sections: Vec<&str> = kind.schema().iter().map(|f| f.title).collect();

        let mut context = Context::new();
        context.insert("report_name", kind.display_name());
        context.insert("application_number", &info.application_number);
        context.insert("title", &info.invention_title);
        context.insert("abstract_text", &info.abstract_text);
        context.insert("ipc_codes", &info.ipc_codes);
        context.insert("sections", &sections);

        let (system, template) = match self.tier {
            BudgetTier::Constrained => (CONSTRAINED_SYSTEM, CONSTRAINED_TEMPLATE),
            BudgetTier::Full => {
                let title_eng = (info.invention_title_eng != NO_DATA)
                    .then_some(info.invention_title_eng.as_str());
                let focus = match kind {
                    ReportKind::Market => MARKET_FOCUS,
                    ReportKind::Business => BUSINESS_FOCUS,
                };
                context.insert("title_eng", &title_eng);
                context.insert("application_date", &info.application_date);
                context.insert("register_status", &info.register_status);
                context.insert("applicants", &info.applicants);
                context.insert("inventors", &info.inventors);
                context.insert("claims", &info.claims);
                context.insert("focus", focus);
                (FULL_SYSTEM, FULL_TEMPLATE)
            }
        };

        let user = Tera::one_off(template, &context, false)?;
        Ok(ReportPrompt {
            system: system.to_string(),
            user,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patent::normalize_patent_info;
    use serde_json::json;

    fn sample_info() -> NormalizedPatentInfo {
        normalize_patent_info(&json!({
            "applicationNumber": "1020230000001",
            "title": "Example Device",
            "inventionTitleEng": "Example Device (EN)",
            "abstract": "A".repeat(50),
            "claims": "B".repeat(50),
            "applicants": ["Acme Corp"],
            "ipcCodes": ["H01M 10/42"]
        }))
    }

    #[test]
    fn test_prompt_contains_title_and_identifier() {
        let info = sample_info();
        for tier in [BudgetTier::Constrained, BudgetTier::Full] {
            for kind in ReportKind::ALL {
                let prompt = PromptBuilder::new(tier).build(&info, kind).unwrap();
                assert!(prompt.user.contains("Example Device"));
                assert!(prompt.user.contains("1020230000001"));
            }
        }
    }

    #[test]
    fn test_full_tier_lists_schema_headers() {
        let info = sample_info();
        let prompt = PromptBuilder::new(BudgetTier::Full)
            .build(&info, ReportKind::Business)
            .unwrap();
        for field in ReportKind::Business.schema() {
            assert!(prompt.user.contains(&format!("\n## {}\n", field.title)));
        }
        assert!(prompt.user.contains(&"B".repeat(50)));
        assert!(prompt.user.contains("Acme Corp"));
        assert!(prompt.user.contains("(Example Device (EN))"));
    }

    #[test]
    fn test_constrained_tier_is_shorter_and_drops_claims() {
        let info = sample_info();
        let full = PromptBuilder::new(BudgetTier::Full)
            .build(&info, ReportKind::Market)
            .unwrap();
        let constrained = PromptBuilder::new(BudgetTier::Constrained)
            .build(&info, ReportKind::Market)
            .unwrap();
        assert!(constrained.user.len() * 2 < full.user.len());
        assert!(constrained.system.len() < full.system.len());
        assert!(!constrained.user.contains(&"B".repeat(50)));
        assert!(!constrained.user.contains("Acme Corp"));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let info = sample_info();
        let builder = PromptBuilder::new(BudgetTier::Full);
        assert_eq!(
            builder.build(&info, ReportKind::Market).unwrap(),
            builder.build(&info, ReportKind::Market).unwrap()
        );
    }

    #[test]
    fn test_sentinel_record_still_renders() {
        let info = normalize_patent_info(&json!(null));
        let prompt = PromptBuilder::new(BudgetTier::Full)
            .build(&info, ReportKind::Market)
            .unwrap();
        assert!(prompt.user.contains(&info.invention_title));
        assert!(prompt.user.contains(&info.application_number));
        assert!(!prompt.user.contains("()"));
    }

    #[test]
    fn test_into_messages() {
        let messages = ReportPrompt {
            system: "s".into(),
            user: "u".into(),
        }
        .into_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
    }
}
