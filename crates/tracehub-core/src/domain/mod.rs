//! Domain model (reports, task identifiers, tags, task records).

pub mod fields;
pub mod record;
pub mod report;

pub use fields::ReportFields;
pub use record::TaskRecord;
pub use report::{Report, Tag, TaskId};
