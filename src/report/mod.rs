//! Report model, section parsing and per-kind formatting.
//!
//! # Example
//!
//! ```rust,ignore
//! use patent_report::report::{parse_report, ReportKind};
//!
//! let report = parse_report(ReportKind::Market, &raw_text);
//! assert!(!report.sections.is_empty());
//! for (column, content) in report.schema_fields() {
//!     println!("{column}: {} chars", content.len());
//! }
//! ```

pub mod cache;
pub mod formatter;
pub mod parser;
pub mod types;

pub use cache::{CacheConfig, CacheKey, CacheStats, InMemoryReportCache, ReportCache};
pub use formatter::{format_section_content, FormatProfile};
pub use parser::{parse_report, SectionParser};
pub use types::{
    ParseTier, QualityMetrics, ReportKind, ReportSection, SchemaField, StructuredReport,
    UnknownReportKind, INCOMPLETE_MARKER,
};
