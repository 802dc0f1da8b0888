//! Event processor: classifies sub-event occurrences and emits each
//! notification at most once.

pub mod classify;
pub mod scan;

pub use classify::{ActingSide, NotificationRules};
pub use scan::{EventProcessor, ScanReport};
