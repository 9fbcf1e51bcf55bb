//! Canonical patent record shared by the prompt, classifier and persister.

use serde::{Deserialize, Serialize};

/// Placeholder for any free-text field that could not be found.
pub const NO_DATA: &str = "No data available";

/// Placeholder for a missing invention title.
pub const NO_TITLE: &str = "No title available";

/// Placeholder for missing identifiers, dates and statuses.
pub const UNKNOWN: &str = "Unknown";

/// Separator used when a list-valued field is collapsed to one string.
pub const LIST_SEPARATOR: &str = ", ";

/// Appended to free text that was cut to its configured maximum.
pub const TRUNCATION_MARKER: &str = "…";

/// Flat, fully-defined description of one patent.
///
/// Every field holds either real data or one of the sentinel strings above,
/// so downstream consumers never branch on absence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedPatentInfo {
    pub application_number: String,
    pub invention_title: String,
    pub invention_title_eng: String,
    pub application_date: String,
    pub open_date: String,
    pub register_status: String,
    pub abstract_text: String,
    pub claims: String,
    pub ipc_codes: String,
    pub cpc_codes: String,
    pub applicants: String,
    pub inventors: String,
}

impl NormalizedPatentInfo {
    /// True when the title or the abstract carries real data.
    pub fn has_substance(&self) -> bool {
        self.invention_title != NO_TITLE || self.abstract_text != NO_DATA
    }

    /// True when the application number is known.
    pub fn has_application_number(&self) -> bool {
        self.application_number != UNKNOWN
    }

    /// IPC codes as a list, empty when none were found.
    pub fn ipc_code_list(&self) -> Vec<String> {
        split_list(&self.ipc_codes)
    }

    /// CPC codes as a list, empty when none were found.
    pub fn cpc_code_list(&self) -> Vec<String> {
        split_list(&self.cpc_codes)
    }
}

fn split_list(joined: &str) -> Vec<String> {
    if joined == NO_DATA {
        return Vec::new();
    }
    joined
        .split(LIST_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Per-field length limits applied during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextLimits {
    pub abstract_max: usize,
    pub claims_max: usize,
}

impl Default for TextLimits {
    fn default() -> Self {
        Self {
            abstract_max: 2000,
            claims_max: 5000,
        }
    }
}

/// Cut `text` to at most `max` characters, appending the truncation marker.
///
/// Cuts on a `char` boundary, so the result is always a valid prefix of the
/// input followed by [`TRUNCATION_MARKER`].
pub fn truncate_text(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        None => text.to_string(),
        Some((byte_idx, _)) => {
            let mut out = String::with_capacity(byte_idx + TRUNCATION_MARKER.len());
            out.push_str(&text[..byte_idx]);
            out.push_str(TRUNCATION_MARKER);
            out
        }
    }
}
