//! Durable progress tracking behind a query-execution adapter.

pub mod executor;
pub mod progress;
pub mod records;

pub use executor::{QueryExecutor, QueryOutcome, Row, SqlValue, SqliteExecutor};
pub use progress::{ProgressStore, StoreError};
pub use records::{PostedContent, ProcessingRecord, SubEventProgress};
