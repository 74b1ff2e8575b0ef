//! One scheduler pass: discover, admit, process, record.

mod pass;
mod summary;

pub use pass::{PassConfig, PassOptions, SchedulerPass};
pub use summary::{ItemDisposition, ItemResult, PassSummary};
