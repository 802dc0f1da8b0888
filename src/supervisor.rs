//! Daily supervision of lifecycle workers and the shared event board.

pub mod board;
pub mod daily;
pub(crate) mod registry;
pub mod status;

pub use board::{BoardEntry, EventBoard, StopFlags, WorkerPhase};
pub use daily::{next_rollover, posting_date, DayOutcome, Supervisor};
pub use status::StatusSummary;
