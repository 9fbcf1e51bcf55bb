//! Database schema constants.
//!
//! PostgreSQL statements are applied one at a time by the migration runner;
//! the SQLite schema is a single script executed on open.

use crate::report::ReportKind;

/// SQL schema for creating the report_records table.
pub const CREATE_REPORT_RECORDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS report_records (
    id UUID PRIMARY KEY,
    user_id VARCHAR(255) NOT NULL,
    application_number VARCHAR(64) NOT NULL,
    report_kind VARCHAR(32) NOT NULL,
    name TEXT NOT NULL,
    invention_title TEXT NOT NULL,
    technology_field VARCHAR(64) NOT NULL,
    technology_confidence DOUBLE PRECISION NOT NULL,
    market_penetration TEXT NOT NULL DEFAULT '',
    competitive_landscape TEXT NOT NULL DEFAULT '',
    market_growth_drivers TEXT NOT NULL DEFAULT '',
    risk_factors TEXT NOT NULL DEFAULT '',
    revenue_model TEXT NOT NULL DEFAULT '',
    royalty_margin TEXT NOT NULL DEFAULT '',
    new_business_opportunities TEXT NOT NULL DEFAULT '',
    competitor_response_strategy TEXT NOT NULL DEFAULT '',
    analysis_data JSONB NOT NULL,
    content_hash CHAR(64) NOT NULL,
    is_fallback BOOLEAN NOT NULL DEFAULT FALSE,
    fallback_reason TEXT,
    status VARCHAR(16) NOT NULL DEFAULT 'active',
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// SQL schema for creating the report_events audit table.
pub const CREATE_REPORT_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS report_events (
    id UUID PRIMARY KEY,
    report_id UUID NOT NULL,
    user_id VARCHAR(255) NOT NULL,
    event_type VARCHAR(64) NOT NULL,
    payload JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// One active report per (user, patent, kind).
pub const CREATE_ACTIVE_REPORT_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_report_records_active_key
    ON report_records(user_id, application_number, report_kind)
    WHERE status = 'active'
"#;

pub const CREATE_REPORT_EVENTS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_report_events_report_id ON report_events(report_id)
"#;

/// Named PostgreSQL migrations, applied in order.
///
/// Names are recorded in `_migrations`; never rename or edit a shipped entry.
pub const POSTGRES_MIGRATIONS: [(&str, &str); 4] = [
    ("0001_report_records", CREATE_REPORT_RECORDS_TABLE),
    ("0002_report_events", CREATE_REPORT_EVENTS_TABLE),
    ("0003_active_report_index", CREATE_ACTIVE_REPORT_INDEX),
    ("0004_report_events_index", CREATE_REPORT_EVENTS_INDEX),
];

/// SQLite schema, executed as one script.
pub const SQLITE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS report_records (
    id                          TEXT    PRIMARY KEY,
    user_id                     TEXT    NOT NULL,
    application_number          TEXT    NOT NULL,
    report_kind                 TEXT    NOT NULL,
    name                        TEXT    NOT NULL,
    invention_title             TEXT    NOT NULL,
    technology_field            TEXT    NOT NULL,
    technology_confidence       REAL    NOT NULL,

    market_penetration          TEXT    NOT NULL DEFAULT '',
    competitive_landscape       TEXT    NOT NULL DEFAULT '',
    market_growth_drivers       TEXT    NOT NULL DEFAULT '',
    risk_factors                TEXT    NOT NULL DEFAULT '',
    revenue_model               TEXT    NOT NULL DEFAULT '',
    royalty_margin              TEXT    NOT NULL DEFAULT '',
    new_business_opportunities  TEXT    NOT NULL DEFAULT '',
    competitor_response_strategy TEXT   NOT NULL DEFAULT '',

    analysis_data               TEXT    NOT NULL,
    content_hash                TEXT    NOT NULL,
    is_fallback                 INTEGER NOT NULL DEFAULT 0,
    fallback_reason             TEXT,
    status                      TEXT    NOT NULL DEFAULT 'active',

    created_at                  TEXT    NOT NULL DEFAULT (datetime('now')),
    updated_at                  TEXT    NOT NULL DEFAULT (datetime('now'))
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_report_records_active_key
    ON report_records(user_id, application_number, report_kind)
    WHERE status = 'active';

CREATE TABLE IF NOT EXISTS report_events (
    id          TEXT PRIMARY KEY,
    report_id   TEXT NOT NULL,
    user_id     TEXT NOT NULL,
    event_type  TEXT NOT NULL,
    payload     TEXT NOT NULL,
    created_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_report_events_report_id ON report_events(report_id);
"#;

/// Every per-kind section column, in table order.
pub fn section_columns() -> Vec<&'static str> {
    ReportKind::ALL
        .iter()
        .flat_map(|kind| kind.schema().iter().map(|field| field.column))
        .collect()
}

/// Table names in the schema.
pub mod tables {
    /// Persisted reports.
    pub const REPORT_RECORDS: &str = "report_records";
    /// Audit events written after a report is stored.
    pub const REPORT_EVENTS: &str = "report_events";
}

/// Status of a live report row; only active rows take part in the unique key.
pub const STATUS_ACTIVE: &str = "active";

/// Status of a replaced or withdrawn row. Kept for audit, ignored by lookups.
pub const STATUS_DELETED: &str = "deleted";
