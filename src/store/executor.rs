//! Query-execution adapter over the durable store.
//!
//! Executors never raise: every statement yields a [`QueryOutcome`], with
//! failures reported as [`QueryOutcome::Failed`] so callers decide whether a
//! failure is fatal.

use anyhow::{Context, Result};
use rusqlite::{params_from_iter, Connection};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

pub use rusqlite::types::Value as SqlValue;

pub type Row = Vec<SqlValue>;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Rows(Vec<Row>),
    Affected(usize),
    Failed(String),
}

pub trait QueryExecutor: Send + Sync {
    fn execute(&self, sql: &str, params: &[SqlValue]) -> QueryOutcome;
}

pub struct SqliteExecutor {
    conn: Mutex<Connection>,
}

impl SqliteExecutor {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create store directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open sqlite store {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            .context("configure sqlite store")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite store")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn run(conn: &Connection, sql: &str, params: &[SqlValue]) -> rusqlite::Result<QueryOutcome> {
        let mut stmt = conn.prepare_cached(sql)?;
        if stmt.column_count() == 0 {
            let affected = stmt.execute(params_from_iter(params.iter()))?;
            return Ok(QueryOutcome::Affected(affected));
        }

        let width = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut collected = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for column in 0..width {
                values.push(row.get::<_, SqlValue>(column)?);
            }
            collected.push(values);
        }
        Ok(QueryOutcome::Rows(collected))
    }
}

impl QueryExecutor for SqliteExecutor {
    fn execute(&self, sql: &str, params: &[SqlValue]) -> QueryOutcome {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        match Self::run(&conn, sql, params) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::debug!(error = %err, sql, "store statement failed");
                QueryOutcome::Failed(err.to_string())
            }
        }
    }
}
