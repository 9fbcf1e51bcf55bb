//! SQLite report store for local runs and tests.

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::report::{ReportKind, StructuredReport};

use super::schema::{section_columns, SQLITE_SCHEMA_SQL, STATUS_ACTIVE, STATUS_DELETED};
use super::store::{NewReport, PersistedReport, ReportEvent, ReportStore, StoreError};

#[derive(Clone)]
pub struct SqliteReportStore {
    pool: SqlitePool,
}

impl SqliteReportStore {
    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        Self::connect(&format!("sqlite://{}", path)).await
    }

    /// Connect with a `sqlite:` URL.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        sqlx::query(SQLITE_SCHEMA_SQL).execute(&pool).await?;

        tracing::info!(url = url, "Report store opened");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Query(format!("invalid id '{}': {}", raw, e)))
}

fn report_from_row(row: &SqliteRow) -> Result<PersistedReport, StoreError> {
    let kind: String = row.get("report_kind");
    let report_kind = ReportKind::from_str(&kind).map_err(|e| StoreError::Query(e.to_string()))?;
    let analysis_data: String = row.get("analysis_data");
    let report: StructuredReport = serde_json::from_str(&analysis_data)?;

    let section_fields: BTreeMap<String, String> = report_kind
        .schema()
        .iter()
        .map(|field| (field.column.to_string(), row.get::<String, _>(field.column)))
        .collect();

    Ok(PersistedReport {
        id: parse_uuid(row.get("id"))?,
        user_id: row.get("user_id"),
        application_number: row.get("application_number"),
        report_kind,
        name: row.get("name"),
        invention_title: row.get("invention_title"),
        technology_field: row.get("technology_field"),
        technology_confidence: row.get("technology_confidence"),
        section_fields,
        report,
        content_hash: row.get("content_hash"),
        is_fallback: row.get::<i64, _>("is_fallback") != 0,
        fallback_reason: row.get("fallback_reason"),
        status: row.get("status"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    })
}

#[async_trait]
impl ReportStore for SqliteReportStore {
    async fn insert_report(&self, report: &NewReport) -> Result<Uuid, StoreError> {
        let columns = section_columns();
        let placeholders: Vec<String> = (0..columns.len()).map(|i| format!("?{}", i + 14)).collect();
        let sql = format!(
            "INSERT INTO report_records (
                id, user_id, application_number, report_kind, name, invention_title,
                technology_field, technology_confidence, analysis_data, content_hash,
                is_fallback, fallback_reason, created_at, {}
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,{})",
            columns.join(", "),
            placeholders.join(",")
        );

        let analysis_data = serde_json::to_string(&report.report)?;
        let mut query = sqlx::query(&sql)
            .bind(report.id.to_string())
            .bind(&report.user_id)
            .bind(&report.application_number)
            .bind(report.report_kind.as_str())
            .bind(&report.name)
            .bind(&report.invention_title)
            .bind(&report.technology_field)
            .bind(report.technology_confidence)
            .bind(&analysis_data)
            .bind(&report.content_hash)
            .bind(report.report.is_fallback as i64)
            .bind(&report.report.fallback_reason)
            .bind(report.created_at);
        for column in &columns {
            query = query.bind(report.section_field(column));
        }
        query.execute(&self.pool).await?;

        Ok(report.id)
    }

    async fn find_active(
        &self,
        user_id: &str,
        application_number: &str,
        kind: ReportKind,
    ) -> Result<Option<Uuid>, StoreError> {
        let row = sqlx::query(
            "SELECT id FROM report_records
             WHERE user_id = ?1 AND application_number = ?2 AND report_kind = ?3 AND status = ?4",
        )
        .bind(user_id)
        .bind(application_number)
        .bind(kind.as_str())
        .bind(STATUS_ACTIVE)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| parse_uuid(r.get("id"))).transpose()
    }

    async fn get_report(&self, id: Uuid) -> Result<Option<PersistedReport>, StoreError> {
        let row = sqlx::query("SELECT * FROM report_records WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(report_from_row).transpose()
    }

    async fn delete_report(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE report_records SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        )
        .bind(STATUS_DELETED)
        .bind(Utc::now())
        .bind(id.to_string())
        .bind(STATUS_ACTIVE)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("Active report {}", id)));
        }
        Ok(())
    }

    async fn insert_event(&self, event: &ReportEvent) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO report_events (id, report_id, user_id, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(event.id.to_string())
        .bind(event.report_id.to_string())
        .bind(&event.user_id)
        .bind(&event.event_type)
        .bind(serde_json::to_string(&event.payload)?)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
