//! Report persistence.
//!
//! # Overview
//!
//! - **ReportStore**: the persistence contract (insert, composite-key lookup,
//!   delete, audit events), with SQLite and PostgreSQL backends
//! - **ReportPersister**: dedup policy, positional field mapping, technology
//!   classification, insert retries and partial salvage
//! - **Migrations**: PostgreSQL schema management
//!
//! # Usage
//!
//! ```rust,ignore
//! use patent_report::storage::{connect, ReportPersister, PersistConfig};
//!
//! let store = storage::connect("sqlite://reports.db").await?;
//! let persister = ReportPersister::new(store, classifier, PersistConfig::default());
//! let saved = persister.persist(PersistRequest::new("user-1", &info, &report, &raw)).await?;
//! ```

pub mod database;
pub mod migrations;
pub mod persister;
pub mod schema;
pub mod sqlite;
pub mod store;

use std::sync::Arc;

pub use database::Database;
pub use migrations::{AppliedMigration, MigrationError, MigrationRunner};
pub use persister::{
    salvage_report, ConflictPolicy, PersistConfig, PersistError, PersistRequest, PersistedOutcome,
    ReportPersister, SALVAGE_REASON,
};
pub use sqlite::SqliteReportStore;
pub use store::{
    NewReport, PersistedReport, ReportEvent, ReportStore, StoreError, REPORT_GENERATE_EVENT,
};

/// Open a store for `database_url`, picking the backend from its scheme.
///
/// PostgreSQL databases are migrated on connect.
pub async fn connect(database_url: &str) -> Result<Arc<dyn ReportStore>, StoreError> {
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        let db = Database::connect(database_url).await?;
        db.run_migrations().await?;
        Ok(Arc::new(db))
    } else if database_url.starts_with("sqlite:") {
        Ok(Arc::new(SqliteReportStore::connect(database_url).await?))
    } else {
        Err(StoreError::UnsupportedUrl(database_url.to_string()))
    }
}
