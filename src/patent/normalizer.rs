//! Shape-matching normalizer for heterogeneous patent records.
//!
//! Patent records reach the pipeline in several layouts: the raw KIPRIS
//! detail response (`*InfoArray.*Info` nesting), the proxied summary layout
//! (`biblioSummaryInfo`, `abstractInfo`, ...), and flat hand-written records.
//! Each layout has a pure matcher; the first one that yields a title or an
//! abstract wins, and a merging pass-through covers everything else.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use super::types::{
    truncate_text, NormalizedPatentInfo, TextLimits, LIST_SEPARATOR, NO_DATA, NO_TITLE, UNKNOWN,
};

/// Envelope keys that wrap the actual record, unwrapped outermost first.
const ENVELOPE_KEYS: &[&str] = &["patentData", "patent", "data", "response", "body", "item"];

/// Maximum envelope depth followed before giving up.
const MAX_ENVELOPE_DEPTH: usize = 6;

/// Fields extracted by a matcher before defaults and limits apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RawPatentFields {
    application_number: Option<String>,
    invention_title: Option<String>,
    invention_title_eng: Option<String>,
    application_date: Option<String>,
    open_date: Option<String>,
    register_status: Option<String>,
    abstract_text: Option<String>,
    claims: Option<String>,
    ipc_codes: Option<String>,
    cpc_codes: Option<String>,
    applicants: Option<String>,
    inventors: Option<String>,
}

impl RawPatentFields {
    fn has_title_or_abstract(&self) -> bool {
        self.invention_title.is_some() || self.abstract_text.is_some()
    }

    /// Fill every empty field of `self` from `other`.
    fn or(self, other: RawPatentFields) -> RawPatentFields {
        RawPatentFields {
            application_number: self.application_number.or(other.application_number),
            invention_title: self.invention_title.or(other.invention_title),
            invention_title_eng: self.invention_title_eng.or(other.invention_title_eng),
            application_date: self.application_date.or(other.application_date),
            open_date: self.open_date.or(other.open_date),
            register_status: self.register_status.or(other.register_status),
            abstract_text: self.abstract_text.or(other.abstract_text),
            claims: self.claims.or(other.claims),
            ipc_codes: self.ipc_codes.or(other.ipc_codes),
            cpc_codes: self.cpc_codes.or(other.cpc_codes),
            applicants: self.applicants.or(other.applicants),
            inventors: self.inventors.or(other.inventors),
        }
    }
}

type ShapeMatcher = fn(&Value) -> Option<RawPatentFields>;

/// Matchers ordered from the most specific nested layout to the flat one.
const SHAPE_MATCHERS: &[(&str, ShapeMatcher)] = &[
    ("kipris_nested", match_kipris_nested),
    ("summary", match_summary_layout),
    ("flat", match_flat_layout),
];

/// Converts any input record into a [`NormalizedPatentInfo`].
///
/// Never fails: malformed or empty input produces a record made of
/// sentinel values.
#[derive(Debug, Clone, Default)]
pub struct PatentInfoNormalizer {
    limits: TextLimits,
}

impl PatentInfoNormalizer {
    pub fn new(limits: TextLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> TextLimits {
        self.limits
    }

    pub fn normalize(&self, input: &Value) -> NormalizedPatentInfo {
        let record = unwrap_envelope(input);

        let raw = SHAPE_MATCHERS
            .iter()
            .find_map(|(shape, matcher)| {
                matcher(record)
                    .filter(RawPatentFields::has_title_or_abstract)
                    .inspect(|_| tracing::debug!(shape = *shape, "Patent record shape matched"))
            })
            .unwrap_or_else(|| {
                tracing::debug!("No patent shape matched, using pass-through");
                pass_through(record)
            });

        self.finish(raw)
    }

    fn finish(&self, raw: RawPatentFields) -> NormalizedPatentInfo {
        let or_unknown = |v: Option<String>| v.unwrap_or_else(|| UNKNOWN.to_string());
        let or_no_data = |v: Option<String>| v.unwrap_or_else(|| NO_DATA.to_string());

        NormalizedPatentInfo {
            application_number: or_unknown(raw.application_number),
            invention_title: raw
                .invention_title
                .unwrap_or_else(|| NO_TITLE.to_string()),
            invention_title_eng: or_no_data(raw.invention_title_eng),
            application_date: or_unknown(raw.application_date.map(|d| normalize_date(&d))),
            open_date: or_unknown(raw.open_date.map(|d| normalize_date(&d))),
            register_status: or_unknown(raw.register_status),
            abstract_text: or_no_data(
                raw.abstract_text
                    .map(|t| truncate_text(&t, self.limits.abstract_max)),
            ),
            claims: or_no_data(raw.claims.map(|t| truncate_text(&t, self.limits.claims_max))),
            ipc_codes: or_no_data(raw.ipc_codes),
            cpc_codes: or_no_data(raw.cpc_codes),
            applicants: or_no_data(raw.applicants),
            inventors: or_no_data(raw.inventors),
        }
    }
}

/// Normalize a patent record with default limits.
pub fn normalize_patent_info(input: &Value) -> NormalizedPatentInfo {
    PatentInfoNormalizer::default().normalize(input)
}

// ============================================================================
// Shape matchers
// ============================================================================

/// Raw KIPRIS detail response: `biblioSummaryInfoArray.biblioSummaryInfo`,
/// `abstractInfoArray.abstractInfo.astrtCont`, `claimInfoArray.claimInfo[]`...
fn match_kipris_nested(record: &Value) -> Option<RawPatentFields> {
    let biblio = nested(record, &["biblioSummaryInfoArray", "biblioSummaryInfo"]).and_then(first_item);
    let abstract_info = nested(record, &["abstractInfoArray", "abstractInfo"]);
    if biblio.is_none() && abstract_info.is_none() {
        return None;
    }

    let mut raw = biblio.map(biblio_fields).unwrap_or_default();
    raw.abstract_text = joined(abstract_info, &["astrtCont", "abstractTextKor", "abstractText"], "\n");
    raw.claims = joined(nested(record, &["claimInfoArray", "claimInfo"]), &["claim"], "\n");
    raw.ipc_codes = joined(nested(record, &["ipcInfoArray", "ipcInfo"]), &["ipcNumber"], LIST_SEPARATOR);
    raw.cpc_codes = joined(
        nested(record, &["cpcInfoArray", "cpcInfo"]),
        &["cpcNumber", "cooperativepatentclassificationNumber"],
        LIST_SEPARATOR,
    );
    raw.applicants = joined(
        nested(record, &["applicantInfoArray", "applicantInfo"]),
        &["name", "engName"],
        LIST_SEPARATOR,
    );
    raw.inventors = joined(
        nested(record, &["inventorInfoArray", "inventorInfo"]),
        &["name", "engName"],
        LIST_SEPARATOR,
    );
    Some(raw)
}

/// Summary layout produced by the registry proxy: `biblioSummaryInfo{..}`,
/// `abstractInfo{astrtCont}`, `claimInfo[]`, `ipcInfo[]`, ...
fn match_summary_layout(record: &Value) -> Option<RawPatentFields> {
    let biblio = record.get("biblioSummaryInfo").and_then(first_item);
    let abstract_info = record.get("abstractInfo");
    if biblio.is_none() && abstract_info.is_none() {
        return None;
    }

    let mut raw = biblio.map(biblio_fields).unwrap_or_default();
    if raw.application_number.is_none() {
        raw.application_number = field(record, &["applicationNumber"]);
    }
    raw.abstract_text = joined(abstract_info, &["astrtCont", "abstractTextKor", "abstractText"], "\n");
    raw.claims = joined(
        record.get("claimInfo"),
        &["claim", "claimTextKor", "claimScope"],
        "\n",
    );
    raw.ipc_codes = joined(record.get("ipcInfo"), &["ipcNumber", "ipcCode"], LIST_SEPARATOR);
    raw.cpc_codes = joined(record.get("cpcInfo"), &["cpcNumber", "cpcCode"], LIST_SEPARATOR);
    raw.applicants = joined(record.get("applicantInfo"), &["name", "applicantName"], LIST_SEPARATOR);
    raw.inventors = joined(record.get("inventorInfo"), &["name", "inventorName"], LIST_SEPARATOR);
    Some(raw)
}

/// Flat record with scalar or list-valued top-level fields.
fn match_flat_layout(record: &Value) -> Option<RawPatentFields> {
    if !record.is_object() {
        return None;
    }

    Some(RawPatentFields {
        application_number: field(
            record,
            &["applicationNumber", "application_number", "applicationNo", "appNo"],
        ),
        invention_title: field(record, &["inventionTitle", "invention_title", "title"]),
        invention_title_eng: field(record, &["inventionTitleEng", "titleEng"]),
        application_date: field(record, &["applicationDate", "application_date"]),
        open_date: field(record, &["openDate", "publicationDate", "open_date"]),
        register_status: field(record, &["registerStatus", "register_status", "status"]),
        abstract_text: first_joined(
            record,
            &["abstract", "abstractText", "abstractTextKor", "astrtCont", "summary"],
            &["astrtCont", "text"],
            "\n",
        ),
        claims: first_joined(
            record,
            &["claims", "claim", "claimText", "claimTextKor", "claimScope"],
            &["claim", "claimScope", "text"],
            "\n",
        ),
        ipc_codes: first_joined(
            record,
            &["ipcCodes", "ipcNumber", "ipc", "ipcCode"],
            &["ipcNumber", "ipcCode"],
            LIST_SEPARATOR,
        ),
        cpc_codes: first_joined(
            record,
            &["cpcCodes", "cpcNumber", "cpc", "cpcCode"],
            &["cpcNumber", "cpcCode"],
            LIST_SEPARATOR,
        ),
        applicants: first_joined(
            record,
            &["applicants", "applicantName", "applicant"],
            &["name", "applicantName"],
            LIST_SEPARATOR,
        ),
        inventors: first_joined(
            record,
            &["inventors", "inventorName", "inventor"],
            &["name", "inventorName"],
            LIST_SEPARATOR,
        ),
    })
}

/// Last resort: merge whatever every matcher found, field by field.
fn pass_through(record: &Value) -> RawPatentFields {
    SHAPE_MATCHERS
        .iter()
        .filter_map(|(_, matcher)| matcher(record))
        .fold(RawPatentFields::default(), RawPatentFields::or)
}

fn biblio_fields(biblio: &Value) -> RawPatentFields {
    RawPatentFields {
        application_number: field(biblio, &["applicationNumber"]),
        invention_title: field(biblio, &["inventionTitle"]),
        invention_title_eng: field(biblio, &["inventionTitleEng"]),
        application_date: field(biblio, &["applicationDate"]),
        open_date: field(biblio, &["openDate", "publicationDate"]),
        register_status: field(biblio, &["registerStatus"]),
        ..Default::default()
    }
}

// ============================================================================
// Value helpers
// ============================================================================

fn unwrap_envelope(input: &Value) -> &Value {
    let mut current = match input {
        Value::Array(items) => items.first().unwrap_or(input),
        _ => input,
    };

    for _ in 0..MAX_ENVELOPE_DEPTH {
        let inner = ENVELOPE_KEYS
            .iter()
            .filter_map(|key| current.get(*key))
            .find(|v| v.is_object());
        match inner {
            Some(v) => current = v,
            None => break,
        }
    }
    current
}

fn nested<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.get(*key))
}

fn first_item(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find(|v| v.is_object()),
        Value::Object(_) => Some(value),
        _ => None,
    }
}

fn clean(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => clean(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => items.iter().find_map(scalar_text),
        _ => None,
    }
}

fn field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| value.get(*key).and_then(scalar_text))
}

/// Collapse a scalar, an object or a list of either into one string.
fn joined(value: Option<&Value>, item_keys: &[&str], separator: &str) -> Option<String> {
    let parts: Vec<String> = match value? {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(_) => field(item, item_keys),
                other => scalar_text(other),
            })
            .collect(),
        obj @ Value::Object(_) => field(obj, item_keys).into_iter().collect(),
        other => scalar_text(other).into_iter().collect(),
    };

    (!parts.is_empty()).then(|| parts.join(separator))
}

fn first_joined(
    record: &Value,
    keys: &[&str],
    item_keys: &[&str],
    separator: &str,
) -> Option<String> {
    keys.iter()
        .find_map(|key| joined(record.get(*key), item_keys, separator))
}

fn date_pattern() -> &'static Regex {
    static DATE: OnceLock<Regex> = OnceLock::new();
    DATE.get_or_init(|| {
        Regex::new(r"^(\d{4})[.\-/ ]?(\d{1,2})[.\-/ ]?(\d{1,2})$").expect("Invalid date regex")
    })
}

/// Render `YYYYMMDD`, `YYYY.MM.DD`, `YYYY/MM/DD` and `YYYY-MM-DD` as
/// `YYYY-MM-DD`. Anything that is not a real calendar date is returned as-is.
pub fn normalize_date(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(caps) = date_pattern().captures(trimmed) else {
        return trimmed.to_string();
    };

    let parsed = (
        caps[1].parse::<i32>(),
        caps[2].parse::<u32>(),
        caps[3].parse::<u32>(),
    );
    match parsed {
        (Ok(y), Ok(m), Ok(d)) => match chrono::NaiveDate::from_ymd_opt(y, m, d) {
            Some(date) => date.format("%Y-%m-%d").to_string(),
            None => trimmed.to_string(),
        },
        _ => trimmed.to_string(),
    }
}
