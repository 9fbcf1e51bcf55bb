//! Deduplicating report persistence.
//!
//! Order of operations for one report:
//!
//! 1. Look up an active row for `(user, application number, kind)`. Under
//!    [`ConflictPolicy::Reject`] an existing row ends the call with
//!    [`PersistError::Conflict`]; under `ReplaceExisting` the row is
//!    marked deleted first and kept for audit.
//! 2. Classify the technology field with a bounded wait, falling back to
//!    the local code/keyword mapping.
//! 3. Insert the row, retrying transient store errors with exponential
//!    backoff. A unique violation here means a concurrent request won the
//!    race and is reported exactly like the pre-check conflict.
//! 4. Write the `report_generate` audit event. Its failure is logged only.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::classify::{classify_locally, Classification, ClassificationRequest, TechFieldClassifier};
use crate::patent::NormalizedPatentInfo;
use crate::report::{parse_report, ReportKind, StructuredReport};

use super::store::{NewReport, ReportEvent, ReportStore, StoreError, REPORT_GENERATE_EVENT};

/// `fallback_reason` recorded for reports built from partial output.
pub const SALVAGE_REASON: &str = "partial_salvage";

/// What to do when an active report already exists for the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Return a conflict carrying the existing id.
    #[default]
    Reject,
    /// Delete the existing row and its events, then insert. Test/admin only.
    ReplaceExisting,
}

/// Settings for [`ReportPersister`].
#[derive(Debug, Clone)]
pub struct PersistConfig {
    pub conflict_policy: ConflictPolicy,
    pub insert_attempts: u32,
    pub insert_backoff: Duration,
    pub classifier_timeout: Duration,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::Reject,
            insert_attempts: 3,
            insert_backoff: Duration::from_millis(200),
            classifier_timeout: Duration::from_secs(10),
        }
    }
}

impl PersistConfig {
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn with_insert_attempts(mut self, attempts: u32) -> Self {
        self.insert_attempts = attempts.max(1);
        self
    }

    pub fn with_insert_backoff(mut self, backoff: Duration) -> Self {
        self.insert_backoff = backoff;
        self
    }

    pub fn with_classifier_timeout(mut self, timeout: Duration) -> Self {
        self.classifier_timeout = timeout;
        self
    }
}

/// Errors that can occur while persisting a report.
#[derive(Debug, Error)]
pub enum PersistError {
    /// An active report already exists for the key.
    #[error("Report already exists: {existing_id}")]
    Conflict { existing_id: Uuid },

    /// Transient store errors outlasted every insert attempt.
    #[error("Storage unavailable after {attempts} attempt(s): {message}")]
    Transient { attempts: u32, message: String },

    /// Non-retryable store failure.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Inputs for one persistence call.
#[derive(Debug, Clone, Copy)]
pub struct PersistRequest<'a> {
    pub user_id: &'a str,
    pub info: &'a NormalizedPatentInfo,
    pub report: &'a StructuredReport,
    /// Raw generation text the report was parsed from.
    pub raw_text: &'a str,
}

impl<'a> PersistRequest<'a> {
    pub fn new(
        user_id: &'a str,
        info: &'a NormalizedPatentInfo,
        report: &'a StructuredReport,
        raw_text: &'a str,
    ) -> Self {
        Self {
            user_id,
            info,
            report,
            raw_text,
        }
    }
}

/// Result of a successful persistence call.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedOutcome {
    pub report_id: Uuid,
    pub classification: Classification,
    /// Id of the row removed under [`ConflictPolicy::ReplaceExisting`].
    pub replaced: Option<Uuid>,
    pub insert_attempts: u32,
}

/// Build the flagged report stored when generation ran out of attempts.
pub fn salvage_report(kind: ReportKind, partial_text: &str) -> StructuredReport {
    parse_report(kind, partial_text).into_salvaged(SALVAGE_REASON)
}

/// Hex SHA-256 of the raw generation text.
pub fn content_hash(raw_text: &str) -> String {
    hex::encode(Sha256::digest(raw_text.as_bytes()))
}

/// Positional mapping of sections onto the kind's columns.
pub fn map_section_fields(report: &StructuredReport) -> BTreeMap<String, String> {
    report
        .schema_fields()
        .into_iter()
        .map(|(column, content)| (column.to_string(), content.to_string()))
        .collect()
}

pub struct ReportPersister {
    store: Arc<dyn ReportStore>,
    classifier: Arc<dyn TechFieldClassifier>,
    config: PersistConfig,
}

impl ReportPersister {
    pub fn new(
        store: Arc<dyn ReportStore>,
        classifier: Arc<dyn TechFieldClassifier>,
        config: PersistConfig,
    ) -> Self {
        Self {
            store,
            classifier,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn ReportStore> {
        &self.store
    }

    pub fn config(&self) -> &PersistConfig {
        &self.config
    }

    pub async fn persist(
        &self,
        request: PersistRequest<'_>,
    ) -> Result<PersistedOutcome, PersistError> {
        let kind = request.report.report_kind;
        let application_number = request.info.application_number.as_str();

        let replaced = match self
            .store
            .find_active(request.user_id, application_number, kind)
            .await?
        {
            None => None,
            Some(existing_id) => match self.config.conflict_policy {
                ConflictPolicy::Reject => {
                    tracing::info!(
                        report_id = %existing_id,
                        application_number,
                        report_kind = %kind,
                        "Active report already exists"
                    );
                    return Err(PersistError::Conflict { existing_id });
                }
                ConflictPolicy::ReplaceExisting => {
                    tracing::warn!(
                        report_id = %existing_id,
                        application_number,
                        report_kind = %kind,
                        "Replacing existing report"
                    );
                    self.store.delete_report(existing_id).await?;
                    Some(existing_id)
                }
            },
        };

        let classification = self.classify(request.info).await;

        let new_report = NewReport {
            id: Uuid::new_v4(),
            user_id: request.user_id.to_string(),
            application_number: application_number.to_string(),
            report_kind: kind,
            name: format!("{}: {}", kind.display_name(), request.info.invention_title),
            invention_title: request.info.invention_title.clone(),
            technology_field: classification.field.to_string(),
            technology_confidence: classification.confidence,
            section_fields: map_section_fields(request.report),
            report: request.report.clone(),
            content_hash: content_hash(request.raw_text),
            created_at: Utc::now(),
        };

        let (report_id, insert_attempts) = self.insert_with_retry(&new_report).await?;

        let event = ReportEvent {
            id: Uuid::new_v4(),
            report_id,
            user_id: new_report.user_id.clone(),
            event_type: REPORT_GENERATE_EVENT.to_string(),
            payload: serde_json::json!({
                "report_id": report_id,
                "report_type": kind.as_str(),
                "application_number": new_report.application_number,
                "title": new_report.invention_title,
                "is_fallback": new_report.report.is_fallback,
                "timestamp": new_report.created_at.to_rfc3339(),
            }),
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.insert_event(&event).await {
            tracing::warn!(report_id = %report_id, error = %e, "Failed to record report event");
        }

        tracing::info!(
            report_id = %report_id,
            application_number,
            report_kind = %kind,
            technology_field = %classification.field,
            is_fallback = new_report.report.is_fallback,
            "Report persisted"
        );

        Ok(PersistedOutcome {
            report_id,
            classification,
            replaced,
            insert_attempts,
        })
    }

    async fn classify(&self, info: &NormalizedPatentInfo) -> Classification {
        let request = ClassificationRequest::from_patent(info);
        match tokio::time::timeout(
            self.config.classifier_timeout,
            self.classifier.classify(&request),
        )
        .await
        {
            Ok(Ok(classification)) => classification,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Classifier failed, using local mapping");
                classify_locally(&request)
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.classifier_timeout.as_millis() as u64,
                    "Classifier timed out, using local mapping"
                );
                classify_locally(&request)
            }
        }
    }

    async fn insert_with_retry(&self, report: &NewReport) -> Result<(Uuid, u32), PersistError> {
        let max_attempts = self.config.insert_attempts.max(1);
        let mut last_message = String::new();

        for attempt in 1..=max_attempts {
            match self.store.insert_report(report).await {
                Ok(id) => return Ok((id, attempt)),
                Err(StoreError::UniqueViolation(message)) => {
                    match self
                        .store
                        .find_active(
                            &report.user_id,
                            &report.application_number,
                            report.report_kind,
                        )
                        .await?
                    {
                        Some(existing_id) => {
                            tracing::info!(
                                report_id = %existing_id,
                                "Concurrent insert won the unique key"
                            );
                            return Err(PersistError::Conflict { existing_id });
                        }
                        // The winner vanished between insert and lookup; try again.
                        None => last_message = message,
                    }
                }
                Err(e) if e.is_transient() => last_message = e.to_string(),
                Err(e) => return Err(PersistError::Store(e)),
            }

            if attempt < max_attempts {
                let delay = self.config.insert_backoff * 2u32.saturating_pow(attempt - 1);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_message,
                    "Report insert failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(PersistError::Transient {
            attempts: max_attempts,
            message: last_message,
        })
    }
}
