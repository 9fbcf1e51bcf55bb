//! Report store contract shared by the SQLite and PostgreSQL backends.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::report::{ReportKind, StructuredReport};

use super::migrations::MigrationError;

/// Event type written after a report row is stored.
pub const REPORT_GENERATE_EVENT: &str = "report_generate";

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection to the database failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// An active row with the same (user, patent, kind) already exists.
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// Pool exhaustion, I/O hiccups and similar; worth retrying.
    #[error("Transient storage error: {0}")]
    Transient(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    Query(String),

    /// Record not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    /// Unsupported database URL.
    #[error("Unsupported database URL: {0}")]
    UnsupportedUrl(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::UniqueViolation(db.message().to_string())
            }
            sqlx::Error::Database(db) if is_busy_code(db.code().as_deref()) => {
                StoreError::Transient(db.message().to_string())
            }
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Transient(err.to_string()),
            sqlx::Error::RowNotFound => StoreError::NotFound(err.to_string()),
            _ => StoreError::Query(err.to_string()),
        }
    }
}

/// SQLite busy/locked and PostgreSQL serialization/deadlock/connection codes.
fn is_busy_code(code: Option<&str>) -> bool {
    matches!(
        code,
        Some("5" | "6" | "40001" | "40P01" | "57P01" | "08000" | "08003" | "08006")
    )
}

/// A report row ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReport {
    pub id: Uuid,
    pub user_id: String,
    pub application_number: String,
    pub report_kind: ReportKind,
    pub name: String,
    pub invention_title: String,
    pub technology_field: String,
    pub technology_confidence: f64,
    /// Section column -> content for the kind's schema.
    pub section_fields: BTreeMap<String, String>,
    pub report: StructuredReport,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

impl NewReport {
    /// Content for `column`, empty when the kind does not fill it.
    pub fn section_field(&self, column: &str) -> &str {
        self.section_fields
            .get(column)
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// A stored report row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedReport {
    pub id: Uuid,
    pub user_id: String,
    pub application_number: String,
    pub report_kind: ReportKind,
    pub name: String,
    pub invention_title: String,
    pub technology_field: String,
    pub technology_confidence: f64,
    pub section_fields: BTreeMap<String, String>,
    pub report: StructuredReport,
    pub content_hash: String,
    pub is_fallback: bool,
    pub fallback_reason: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Audit record written after a report row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEvent {
    pub id: Uuid,
    pub report_id: Uuid,
    pub user_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Persistence collaborator.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Insert a new active report and return its id.
    ///
    /// A duplicate active key surfaces as [`StoreError::UniqueViolation`].
    async fn insert_report(&self, report: &NewReport) -> Result<Uuid, StoreError>;

    /// Id of the active report for the composite key, if any.
    async fn find_active(
        &self,
        user_id: &str,
        application_number: &str,
        kind: ReportKind,
    ) -> Result<Option<Uuid>, StoreError>;

    async fn get_report(&self, id: Uuid) -> Result<Option<PersistedReport>, StoreError>;

    /// Mark an active report as deleted. The row and its audit events stay;
    /// the composite key becomes free for a new active row.
    async fn delete_report(&self, id: Uuid) -> Result<(), StoreError>;

    async fn insert_event(&self, event: &ReportEvent) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_classes() {
        assert!(StoreError::Transient("pool".into()).is_transient());
        assert!(!StoreError::Query("syntax".into()).is_transient());
        assert!(StoreError::UniqueViolation("dup".into()).is_unique_violation());
        assert!(StoreError::from(sqlx::Error::PoolTimedOut).is_transient());
        assert!(matches!(
            StoreError::from(sqlx::Error::RowNotFound),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn test_busy_codes() {
        assert!(is_busy_code(Some("5")));
        assert!(is_busy_code(Some("40001")));
        assert!(!is_busy_code(Some("23505")));
        assert!(!is_busy_code(None));
    }
}
