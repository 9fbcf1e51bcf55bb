//! Patent record normalization.
//!
//! Turns whatever nested JSON the registry proxy or caller hands over into a
//! flat [`NormalizedPatentInfo`] with every field defined.
//!
//! ```rust,ignore
//! use patent_report::patent::{PatentInfoNormalizer, TextLimits};
//!
//! let normalizer = PatentInfoNormalizer::new(TextLimits { abstract_max: 1500, claims_max: 2000 });
//! let info = normalizer.normalize(&record);
//! println!("{} ({})", info.invention_title, info.application_number);
//! ```

pub mod normalizer;
pub mod types;

pub use normalizer::{normalize_date, normalize_patent_info, PatentInfoNormalizer};
pub use types::{
    truncate_text, NormalizedPatentInfo, TextLimits, LIST_SEPARATOR, NO_DATA, NO_TITLE,
    TRUNCATION_MARKER, UNKNOWN,
};
