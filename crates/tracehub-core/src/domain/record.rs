//! Task record: the store-maintained summary of one task.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ReportFields, Tag, TaskId};

/// Summary of every report observed for one task.
///
/// Design:
/// - Created on the first report for a task, updated on every later one.
/// - Never deleted by the core (retention belongs to the store).
/// - `last_seq` is the store-wide sequence number of the newest report and
///   breaks ties between equal `last_seen` timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub title: Option<String>,
    pub tags: BTreeSet<Tag>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub num_reports: u64,
    pub last_seq: u64,
}

impl TaskRecord {
    pub fn new(task_id: TaskId, seen_at: DateTime<Utc>) -> Self {
        Self {
            task_id,
            title: None,
            tags: BTreeSet::new(),
            first_seen: seen_at,
            last_seen: seen_at,
            num_reports: 0,
            last_seq: 0,
        }
    }

    /// Fold one report into the summary.
    ///
    /// Order-insensitive for timestamps and tags, so records can be rebuilt
    /// from storage in any file order. The title follows the highest `seq`.
    pub fn observe(&mut self, fields: &ReportFields, seen_at: DateTime<Utc>, seq: u64) {
        self.first_seen = self.first_seen.min(seen_at);
        self.last_seen = self.last_seen.max(seen_at);
        self.tags.extend(fields.tags.iter().cloned());
        self.num_reports += 1;

        if seq >= self.last_seq {
            self.last_seq = seq;
            if let Some(title) = &fields.title {
                self.title = Some(title.clone());
            }
        }
    }

    /// Ordering key for "most recently active".
    pub fn recency_key(&self) -> (DateTime<Utc>, u64) {
        (self.last_seen, self.last_seq)
    }

    pub fn has_tag(&self, tag: &Tag) -> bool {
        self.tags.contains(tag)
    }
}
