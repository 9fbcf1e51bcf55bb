//! Per-kind markdown clean-up applied to each section's content.
//!
//! Pure text-to-text: section boundaries are decided by the parser and never
//! change here.

use regex::Regex;
use std::sync::OnceLock;

use super::types::ReportKind;

/// Which rewrites apply to a report kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatProfile {
    /// `**Label**:` on its own line becomes `### Label`.
    pub promote_label_lines: bool,
    /// `1. text` becomes `1. **text**`.
    pub bold_numbered_items: bool,
    /// `Stage 1: ...` / `1단계: ...` lines become `####` headers.
    pub stage_headers: bool,
    /// Percentages, amounts and durations are wrapped in `**`.
    pub highlight_numbers: bool,
}

impl FormatProfile {
    pub fn for_kind(kind: ReportKind) -> Self {
        match kind {
            ReportKind::Market => Self {
                promote_label_lines: true,
                bold_numbered_items: false,
                stage_headers: false,
                highlight_numbers: true,
            },
            ReportKind::Business => Self {
                promote_label_lines: true,
                bold_numbered_items: true,
                stage_headers: true,
                highlight_numbers: true,
            },
        }
    }
}

struct Patterns {
    label_line: Regex,
    bullet: Regex,
    numbered: Regex,
    stage: Regex,
    numeric_token: Regex,
    blank_run: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        label_line: Regex::new(r"^\*\*([^*]+)\*\*\s*[:：]\s*$").expect("Invalid label regex"),
        bullet: Regex::new(r"^(?:[-*+]\s+|[•·▪▫]\s*)(.+)$").expect("Invalid bullet regex"),
        numbered: Regex::new(r"^(\d+)\.\s+(.+)$").expect("Invalid numbered regex"),
        stage: Regex::new(r"(?i)^(?:(\d+)\s*단계|(?:stage|phase|step)\s+(\d+))\s*[:：]\s*(.+)$")
            .expect("Invalid stage regex"),
        numeric_token: Regex::new(
            r"(\$\d+(?:[.,]\d+)*(?:\s?(?:billion|million|trillion))?|\d+(?:[.,]\d+)*\s?(?:%|억|조|년|개월))",
        )
        .expect("Invalid numeric token regex"),
        blank_run: Regex::new(r"\n{3,}").expect("Invalid blank-run regex"),
    })
}

/// Re-flow one section's content according to the kind's profile.
pub fn format_section_content(kind: ReportKind, content: &str) -> String {
    format_with_profile(FormatProfile::for_kind(kind), content)
}

pub fn format_with_profile(profile: FormatProfile, content: &str) -> String {
    let p = patterns();
    let normalized = content.replace("\r\n", "\n");
    let mut out: Vec<String> = Vec::new();

    for line in normalized.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            out.push(String::new());
            continue;
        }

        if profile.promote_label_lines {
            if let Some(caps) = p.label_line.captures(trimmed) {
                out.push(String::new());
                out.push(format!("### {}", caps[1].trim()));
                out.push(String::new());
                continue;
            }
        }

        if profile.stage_headers {
            if let Some(caps) = p.stage.captures(trimmed) {
                let number = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
                out.push(String::new());
                out.push(format!("#### Stage {}: {}", number, caps[3].trim()));
                out.push(String::new());
                continue;
            }
        }

        if let Some(caps) = p.bullet.captures(trimmed) {
            let indent = if line.starts_with("  ") || line.starts_with('\t') {
                "  "
            } else {
                ""
            };
            out.push(format!("{}- {}", indent, caps[1].trim()));
            continue;
        }

        if profile.bold_numbered_items {
            if let Some(caps) = p.numbered.captures(trimmed) {
                let text = caps[2].trim();
                if text.contains("**") {
                    out.push(format!("{}. {}", &caps[1], text));
                } else {
                    out.push(format!("{}. **{}**", &caps[1], text));
                }
                continue;
            }
        }

        out.push(trimmed.to_string());
    }

    let joined = out.join("\n");
    let collapsed = p.blank_run.replace_all(&joined, "\n\n");
    let trimmed = collapsed.trim();

    if !profile.highlight_numbers {
        return trimmed.to_string();
    }

    trimmed
        .lines()
        .map(|line| {
            if line.starts_with('#') {
                line.to_string()
            } else {
                highlight_outside_bold(line, &p.numeric_token)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Wrap numeric tokens in `**`, skipping text that is already bold.
fn highlight_outside_bold(line: &str, token: &Regex) -> String {
    line.split("**")
        .enumerate()
        .map(|(i, segment)| {
            if i % 2 == 0 {
                token.replace_all(segment, "**$1**").into_owned()
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("**")
}
