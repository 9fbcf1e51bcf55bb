//! Cascading section parser for free-form generation output.
//!
//! Tiers run in order and the first one that yields a section with content
//! wins:
//!
//! 1. header scan (`#` headers, `**bold**` lines, setext underlines; then
//!    numbered and bracketed headers if none of those matched)
//! 2. sub-header scan (`**Label**:` lines, stage lines, per-kind keyed phrases)
//! 3. paragraph split on blank lines
//! 4. fixed-size sentence groups
//! 5. the whole text as one section
//!
//! [`SectionParser::parse`] never fails and always returns at least one
//! section with non-empty content.

use regex::Regex;
use std::sync::OnceLock;

use super::formatter::format_section_content;
use super::types::{
    summarize, ParseTier, QualityMetrics, ReportKind, ReportSection, StructuredReport,
};

/// Longest line, in characters, still accepted as a header.
pub const MAX_HEADER_CHARS: usize = 80;
/// Paragraphs at or below this length are not promoted to sections.
pub const MIN_PARAGRAPH_CHARS: usize = 50;
/// Sentences at or below this length are ignored by the grouping tier.
pub const MIN_SENTENCE_CHARS: usize = 20;
pub const SENTENCES_PER_GROUP: usize = 3;
/// Below this total content length an advisory section is appended.
pub const MIN_TOTAL_CONTENT_CHARS: usize = 100;
/// Paragraph titles are cut to this many characters.
pub const PARAGRAPH_TITLE_CHARS: usize = 50;

pub const ADVISORY_TITLE: &str = "Analysis Notes";
pub const ADVISORY_CONTENT: &str = "This analysis was generated automatically from the \
supplied patent data and is shorter than expected. Run the report again for a more \
detailed analysis.";
pub const EMPTY_OUTPUT_CONTENT: &str = "The generation service returned no usable text \
for this report.";

struct Patterns {
    leveled: Regex,
    bold_line: Regex,
    underscore_line: Regex,
    setext_underline: Regex,
    rule: Regex,
    numbered: Regex,
    bracketed: Regex,
    labeled_colon: Regex,
    plain_label: Regex,
    stage: Regex,
    paragraph_break: Regex,
    sentence_break: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        leveled: Regex::new(r"^#{1,6}\s+(.+?)\s*#*$").expect("Invalid leveled header regex"),
        bold_line: Regex::new(r"^\*\*([^*]+)\*\*$").expect("Invalid bold header regex"),
        underscore_line: Regex::new(r"^__([^_]+)__$").expect("Invalid underscore header regex"),
        setext_underline: Regex::new(r"^(?:={3,}|-{3,})$").expect("Invalid setext regex"),
        rule: Regex::new(r"^(?:[-*_]\s*){3,}$").expect("Invalid rule regex"),
        numbered: Regex::new(r"^(\d{1,2})[.)]\s+(.+)$").expect("Invalid numbered header regex"),
        bracketed: Regex::new(r"^(?:\[([^\]]+)\]|【([^】]+)】)$").expect("Invalid bracket regex"),
        labeled_colon: Regex::new(r"^\*\*([^*]+)\*\*\s*[:：]\s*$").expect("Invalid label regex"),
        plain_label: Regex::new(r"^([^:：*#\-\d][^:：*#]{1,39})[:：]$").expect("Invalid label regex"),
        stage: Regex::new(r"(?i)^((?:\d+\s*단계|(?:stage|phase|step)\s+\d+)\s*[:：]\s*.+)$")
            .expect("Invalid stage regex"),
        paragraph_break: Regex::new(r"\n\s*\n").expect("Invalid paragraph regex"),
        sentence_break: Regex::new(r"[.!?。]\s+").expect("Invalid sentence regex"),
    })
}

/// Parses raw generation output for one report kind.
#[derive(Debug, Clone)]
pub struct SectionParser {
    kind: ReportKind,
    max_header_chars: usize,
}

impl SectionParser {
    pub fn new(kind: ReportKind) -> Self {
        Self {
            kind,
            max_header_chars: MAX_HEADER_CHARS,
        }
    }

    pub fn with_max_header_chars(mut self, max: usize) -> Self {
        self.max_header_chars = max;
        self
    }

    pub fn kind(&self) -> ReportKind {
        self.kind
    }

    /// Turn raw text into a [`StructuredReport`]. Total over all inputs.
    pub fn parse(&self, raw_text: &str) -> StructuredReport {
        let text = raw_text.replace("\r\n", "\n");
        let (mut tier, sections) = self.run_tiers(&text);

        let mut sections: Vec<ReportSection> = sections
            .into_iter()
            .map(|s| ReportSection::new(s.title, format_section_content(self.kind, &s.content)))
            .filter(|s| !s.content.trim().is_empty())
            .collect();

        if sections.is_empty() {
            tier = ParseTier::SingleSection;
            sections = self.single_section(&text);
        }

        let initial = QualityMetrics::from_sections(&sections);
        if initial.total_content_length < MIN_TOTAL_CONTENT_CHARS {
            tracing::warn!(
                report_kind = %self.kind,
                total_content_length = initial.total_content_length,
                "Parsed report is thin, appending advisory section"
            );
            sections.push(ReportSection::new(ADVISORY_TITLE, ADVISORY_CONTENT));
        }

        let quality_metrics = QualityMetrics::from_sections(&sections);
        tracing::debug!(
            report_kind = %self.kind,
            tier = ?tier,
            total_sections = quality_metrics.total_sections,
            total_content_length = quality_metrics.total_content_length,
            "Parsed report sections"
        );

        StructuredReport {
            report_kind: self.kind,
            report_name: self.kind.display_name().to_string(),
            summary: summarize(&sections),
            sections,
            quality_metrics,
            parse_tier: tier,
            is_fallback: false,
            fallback_reason: None,
        }
    }

    fn run_tiers(&self, text: &str) -> (ParseTier, Vec<ReportSection>) {
        let tiers: [(ParseTier, fn(&Self, &str) -> Vec<ReportSection>); 4] = [
            (ParseTier::HeaderScan, Self::header_scan),
            (ParseTier::SubHeader, Self::sub_header_scan),
            (ParseTier::ParagraphSplit, Self::paragraph_split),
            (ParseTier::SentenceGroups, Self::sentence_groups),
        ];

        for (tier, run) in tiers {
            let sections: Vec<ReportSection> = run(self, text)
                .into_iter()
                .filter(|s| !s.content.trim().is_empty())
                .collect();
            if !sections.is_empty() {
                return (tier, sections);
            }
            tracing::trace!(tier = ?tier, "Parse tier produced no sections");
        }

        (ParseTier::SingleSection, self.single_section(text))
    }

    // ------------------------------------------------------------------
    // Tier 1: header notations
    // ------------------------------------------------------------------

    fn header_scan(&self, text: &str) -> Vec<ReportSection> {
        let strong = self.scan_lines(text, |line| self.strong_header(line), true);
        if strong.iter().any(|s| !s.content.is_empty()) {
            return strong;
        }
        self.scan_lines(text, |line| self.weak_header(line), false)
    }

    /// Leveled and emphasized-line headers.
    fn strong_header(&self, line: &str) -> Option<String> {
        let p = patterns();
        let caps = p
            .leveled
            .captures(line)
            .or_else(|| p.bold_line.captures(line))
            .or_else(|| p.underscore_line.captures(line))?;
        self.accept_title(&caps[1])
    }

    /// Numbered and bracketed headers. Numbered lines that read as full
    /// sentences stay list items.
    fn weak_header(&self, line: &str) -> Option<String> {
        let p = patterns();
        if let Some(caps) = p.numbered.captures(line) {
            let title = caps[2].trim();
            if title.ends_with(['.', '!', '?', '。']) {
                return None;
            }
            return self.accept_title(title);
        }
        let caps = p.bracketed.captures(line)?;
        let inner = caps.get(1).or_else(|| caps.get(2))?;
        self.accept_title(inner.as_str())
    }

    // ------------------------------------------------------------------
    // Tier 2: labeled-colon, stage and keyed-phrase sub-headers
    // ------------------------------------------------------------------

    fn sub_header_scan(&self, text: &str) -> Vec<ReportSection> {
        self.scan_lines(text, |line| self.sub_header(line), false)
    }

    fn sub_header(&self, line: &str) -> Option<String> {
        let p = patterns();
        if let Some(caps) = p
            .labeled_colon
            .captures(line)
            .or_else(|| p.plain_label.captures(line))
        {
            return self.accept_title(&caps[1]);
        }
        if let Some(caps) = p.stage.captures(line) {
            return self.accept_title(&caps[1]);
        }

        let candidate = compact(&clean_title(line));
        let keyed = self
            .kind
            .keyed_phrases()
            .iter()
            .copied()
            .chain(self.kind.schema().iter().map(|f| f.title))
            .any(|phrase| compact(phrase) == candidate);
        if keyed {
            return self.accept_title(line);
        }
        None
    }

    /// Line scanner shared by tiers 1 and 2. Text before the first header is
    /// dropped; horizontal rules never become content.
    fn scan_lines<F>(&self, text: &str, detect: F, allow_setext: bool) -> Vec<ReportSection>
    where
        F: Fn(&str) -> Option<String>,
    {
        let p = patterns();
        let lines: Vec<&str> = text.lines().collect();
        let mut sections = Vec::new();
        let mut current: Option<(String, Vec<&str>)> = None;
        // A setext title must follow a blank line or a rule; an underline
        // straight after body text or a header is a horizontal rule.
        let mut at_block_start = true;

        let mut i = 0;
        while i < lines.len() {
            let trimmed = lines[i].trim();
            let mut title = None;

            if !trimmed.is_empty() {
                let underlined = allow_setext
                    && at_block_start
                    && lines
                        .get(i + 1)
                        .is_some_and(|next| p.setext_underline.is_match(next.trim()));
                if underlined && !trimmed.ends_with(['.', '!', '?', '。']) {
                    title = self.accept_title(trimmed);
                    if title.is_some() {
                        i += 1;
                    }
                }
                if title.is_none() {
                    title = detect(trimmed);
                }
            }

            match title {
                Some(title) => {
                    if let Some((t, body)) = current.take() {
                        sections.push(section_from(t, &body));
                    }
                    current = Some((title, Vec::new()));
                    at_block_start = false;
                }
                None => {
                    at_block_start = trimmed.is_empty() || p.rule.is_match(trimmed);
                    if let Some((_, body)) = current.as_mut() {
                        if !p.rule.is_match(trimmed) {
                            body.push(lines[i]);
                        }
                    }
                }
            }
            i += 1;
        }

        if let Some((t, body)) = current.take() {
            sections.push(section_from(t, &body));
        }
        sections
    }

    fn accept_title(&self, raw: &str) -> Option<String> {
        let title = clean_title(raw);
        let len = title.chars().count();
        (len > 0 && len <= self.max_header_chars).then_some(title)
    }

    // ------------------------------------------------------------------
    // Tiers 3-5: structure-free fallbacks
    // ------------------------------------------------------------------

    fn paragraph_split(&self, text: &str) -> Vec<ReportSection> {
        let paragraphs: Vec<&str> = patterns()
            .paragraph_break
            .split(text)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if paragraphs.len() <= 1 {
            return Vec::new();
        }

        paragraphs
            .into_iter()
            .filter(|p| p.chars().count() > MIN_PARAGRAPH_CHARS)
            .map(|p| ReportSection::new(paragraph_title(p), p))
            .collect()
    }

    fn sentence_groups(&self, text: &str) -> Vec<ReportSection> {
        let sentences: Vec<&str> = patterns()
            .sentence_break
            .split(text)
            .map(|s| s.trim().trim_end_matches(['.', '!', '?', '。']))
            .filter(|s| s.chars().count() > MIN_SENTENCE_CHARS)
            .collect();
        if sentences.len() <= SENTENCES_PER_GROUP {
            return Vec::new();
        }

        sentences
            .chunks(SENTENCES_PER_GROUP)
            .map(|group| format!("{}.", group.join(". ")))
            .filter(|group| group.chars().count() > MIN_PARAGRAPH_CHARS)
            .enumerate()
            .map(|(i, group)| ReportSection::new(format!("Analysis Part {}", i + 1), group))
            .collect()
    }

    fn single_section(&self, text: &str) -> Vec<ReportSection> {
        let trimmed = text.trim();
        let content = if trimmed.is_empty() {
            EMPTY_OUTPUT_CONTENT
        } else {
            trimmed
        };
        vec![ReportSection::new(self.kind.display_name(), content)]
    }
}

/// Parse `raw_text` with default settings.
pub fn parse_report(kind: ReportKind, raw_text: &str) -> StructuredReport {
    SectionParser::new(kind).parse(raw_text)
}

fn section_from(title: String, body: &[&str]) -> ReportSection {
    ReportSection::new(title, body.join("\n").trim())
}

/// Strip markdown emphasis, trailing colons and stray hashes from a title.
fn clean_title(raw: &str) -> String {
    let mut title = raw.trim().trim_start_matches('#').trim();
    for wrapper in ["**", "__"] {
        if let Some(inner) = title
            .strip_prefix(wrapper)
            .and_then(|t| t.strip_suffix(wrapper))
        {
            title = inner.trim();
        }
    }
    title
        .trim_end_matches([':', '：'])
        .trim()
        .replace("**", "")
}

fn compact(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn paragraph_title(paragraph: &str) -> String {
    let first_line = paragraph.lines().next().unwrap_or(paragraph);
    let first_sentence = patterns()
        .sentence_break
        .split(first_line)
        .next()
        .unwrap_or(first_line);
    let cleaned = clean_title(first_sentence);
    match cleaned.char_indices().nth(PARAGRAPH_TITLE_CHARS) {
        Some((idx, _)) => format!("{}...", &cleaned[..idx]),
        None => cleaned,
    }
}
