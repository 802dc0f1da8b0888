//! Durable progress: which content was posted for an (event, kind, date), and
//! which sub-events and actions already produced notifications.

use crate::model::{ContentKind, EventId};
use crate::store::executor::{QueryExecutor, QueryOutcome, Row, SqlValue};
use crate::store::records::{PostedContent, ProcessingRecord};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use std::sync::Arc;

const DATE_FORMAT: &str = "%Y-%m-%d";

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS posted_content (
        event_id INTEGER NOT NULL,
        kind TEXT NOT NULL,
        date TEXT NOT NULL,
        content_id TEXT NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (event_id, kind, date)
    )",
    "CREATE TABLE IF NOT EXISTS processing_record (
        event_id INTEGER NOT NULL,
        content_id TEXT NOT NULL,
        record_json TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (event_id, content_id)
    )",
];

const SELECT_POSTED: &str = "SELECT content_id, deleted, created_at, updated_at
     FROM posted_content WHERE event_id = ?1 AND kind = ?2 AND date = ?3";
const UPSERT_POSTED: &str = "INSERT INTO posted_content
        (event_id, kind, date, content_id, deleted, created_at, updated_at)
     VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)
     ON CONFLICT (event_id, kind, date) DO UPDATE SET
        content_id = excluded.content_id, deleted = 0, updated_at = excluded.updated_at";
const TOUCH_POSTED: &str = "UPDATE posted_content SET updated_at = ?4
     WHERE event_id = ?1 AND kind = ?2 AND date = ?3";
const SOFT_DELETE_POSTED: &str = "UPDATE posted_content SET deleted = 1, updated_at = ?4
     WHERE event_id = ?1 AND kind = ?2 AND date = ?3";
const PROBE: &str = "SELECT COUNT(*) FROM posted_content";
const SELECT_PROCESSING: &str =
    "SELECT record_json FROM processing_record WHERE event_id = ?1 AND content_id = ?2";
const INSERT_PROCESSING: &str = "INSERT OR IGNORE INTO processing_record
        (event_id, content_id, record_json, updated_at) VALUES (?1, ?2, ?3, ?4)";
const UPSERT_PROCESSING: &str = "INSERT INTO processing_record
        (event_id, content_id, record_json, updated_at) VALUES (?1, ?2, ?3, ?4)
     ON CONFLICT (event_id, content_id) DO UPDATE SET
        record_json = excluded.record_json, updated_at = excluded.updated_at";

/// A statement came back with the executor's failure marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub statement: &'static str,
    pub message: String,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store {} failed: {}", self.statement, self.message)
    }
}

impl std::error::Error for StoreError {}

#[derive(Clone)]
pub struct ProgressStore {
    executor: Arc<dyn QueryExecutor>,
}

impl ProgressStore {
    /// Wraps `executor` and ensures the schema exists. An error here means
    /// the store is unusable and the process cannot keep its guarantees.
    pub fn open(executor: Arc<dyn QueryExecutor>) -> Result<Self> {
        for statement in SCHEMA {
            if let QueryOutcome::Failed(message) = executor.execute(statement, &[]) {
                return Err(StoreError {
                    statement: "schema",
                    message,
                })
                .context("progress store schema could not be created");
            }
        }
        Ok(Self { executor })
    }

    /// Round-trips a trivial read so a dead connection surfaces before any
    /// worker relies on the store.
    pub async fn check(&self) -> Result<()> {
        self.rows("probe", PROBE, Vec::new()).await?;
        Ok(())
    }

    /// Live (not soft-deleted) content for the key, if any.
    pub async fn posted(
        &self,
        event_id: EventId,
        kind: ContentKind,
        date: NaiveDate,
    ) -> Result<Option<PostedContent>> {
        let rows = self
            .rows("select posted", SELECT_POSTED, key_params(event_id, kind, date))
            .await?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };

        let posted = PostedContent {
            event_id,
            kind,
            date,
            content_id: text(&row, 0).context("posted_content.content_id")?,
            deleted: integer(&row, 1).context("posted_content.deleted")? != 0,
            created_at: timestamp(&row, 2).context("posted_content.created_at")?,
            updated_at: timestamp(&row, 3).context("posted_content.updated_at")?,
        };
        Ok((!posted.deleted).then_some(posted))
    }

    pub async fn record_posted(
        &self,
        event_id: EventId,
        kind: ContentKind,
        date: NaiveDate,
        content_id: &str,
    ) -> Result<()> {
        let mut params = key_params(event_id, kind, date);
        params.push(SqlValue::Text(content_id.to_owned()));
        params.push(now_param());
        self.affect("record posted", UPSERT_POSTED, params).await?;
        tracing::debug!(event_id, %kind, %date, content_id, "posted content recorded");
        Ok(())
    }

    /// Stamps the last edit time on the posted content.
    pub async fn touch_posted(
        &self,
        event_id: EventId,
        kind: ContentKind,
        date: NaiveDate,
    ) -> Result<()> {
        let mut params = key_params(event_id, kind, date);
        params.push(now_param());
        self.affect("touch posted", TOUCH_POSTED, params).await?;
        Ok(())
    }

    pub async fn soft_delete_posted(
        &self,
        event_id: EventId,
        kind: ContentKind,
        date: NaiveDate,
    ) -> Result<()> {
        let mut params = key_params(event_id, kind, date);
        params.push(now_param());
        let affected = self
            .affect("soft delete posted", SOFT_DELETE_POSTED, params)
            .await?;
        tracing::debug!(event_id, %kind, %date, affected, "posted content soft-deleted");
        Ok(())
    }

    /// Processing record for a content item, created empty on first access.
    pub async fn load_processing(
        &self,
        event_id: EventId,
        content_id: &str,
    ) -> Result<ProcessingRecord> {
        let params = vec![event_param(event_id), SqlValue::Text(content_id.to_owned())];
        let rows = self
            .rows("select processing", SELECT_PROCESSING, params)
            .await?;

        if let Some(row) = rows.into_iter().next() {
            let raw = text(&row, 0).context("processing_record.record_json")?;
            return serde_json::from_str(&raw).with_context(|| {
                format!("corrupt processing record for event {event_id} content {content_id}")
            });
        }

        let record = ProcessingRecord::default();
        let params = vec![
            event_param(event_id),
            SqlValue::Text(content_id.to_owned()),
            SqlValue::Text(serde_json::to_string(&record)?),
            now_param(),
        ];
        self.affect("create processing", INSERT_PROCESSING, params)
            .await?;
        Ok(record)
    }

    pub async fn save_processing(
        &self,
        event_id: EventId,
        content_id: &str,
        record: &ProcessingRecord,
    ) -> Result<()> {
        let params = vec![
            event_param(event_id),
            SqlValue::Text(content_id.to_owned()),
            SqlValue::Text(serde_json::to_string(record)?),
            now_param(),
        ];
        self.affect("save processing", UPSERT_PROCESSING, params)
            .await?;
        Ok(())
    }

    async fn run(
        &self,
        statement: &'static str,
        sql: &'static str,
        params: Vec<SqlValue>,
    ) -> Result<QueryOutcome, StoreError> {
        let executor = self.executor.clone();
        let outcome = tokio::task::spawn_blocking(move || executor.execute(sql, &params))
            .await
            .unwrap_or_else(|err| QueryOutcome::Failed(format!("store task aborted: {err}")));

        match outcome {
            QueryOutcome::Failed(message) => Err(StoreError { statement, message }),
            outcome => Ok(outcome),
        }
    }

    async fn rows(
        &self,
        statement: &'static str,
        sql: &'static str,
        params: Vec<SqlValue>,
    ) -> Result<Vec<Row>> {
        match self.run(statement, sql, params).await? {
            QueryOutcome::Rows(rows) => Ok(rows),
            QueryOutcome::Affected(_) => Ok(Vec::new()),
            QueryOutcome::Failed(message) => Err(StoreError { statement, message }.into()),
        }
    }

    async fn affect(
        &self,
        statement: &'static str,
        sql: &'static str,
        params: Vec<SqlValue>,
    ) -> Result<usize> {
        match self.run(statement, sql, params).await? {
            QueryOutcome::Affected(count) => Ok(count),
            QueryOutcome::Rows(rows) => Ok(rows.len()),
            QueryOutcome::Failed(message) => Err(StoreError { statement, message }.into()),
        }
    }
}

fn event_param(event_id: EventId) -> SqlValue {
    SqlValue::Integer(i64::try_from(event_id).unwrap_or(i64::MAX))
}

fn key_params(event_id: EventId, kind: ContentKind, date: NaiveDate) -> Vec<SqlValue> {
    vec![
        event_param(event_id),
        SqlValue::Text(kind.as_str().to_owned()),
        SqlValue::Text(date.format(DATE_FORMAT).to_string()),
    ]
}

fn now_param() -> SqlValue {
    SqlValue::Text(Utc::now().to_rfc3339())
}

fn text(row: &Row, column: usize) -> Result<String> {
    match row.get(column) {
        Some(SqlValue::Text(value)) => Ok(value.clone()),
        other => anyhow::bail!("expected text in column {column}, found {other:?}"),
    }
}

fn integer(row: &Row, column: usize) -> Result<i64> {
    match row.get(column) {
        Some(SqlValue::Integer(value)) => Ok(*value),
        other => anyhow::bail!("expected integer in column {column}, found {other:?}"),
    }
}

fn timestamp(row: &Row, column: usize) -> Result<DateTime<Utc>> {
    let raw = text(row, column)?;
    Ok(DateTime::parse_from_rfc3339(&raw)
        .with_context(|| format!("invalid timestamp `{raw}`"))?
        .with_timezone(&Utc))
}
