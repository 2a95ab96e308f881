//! TaskIndex - task / tag / recency の in-memory index
//!
//! Shared by the built-in stores. The owner wraps it in its own lock.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::domain::{ReportFields, Tag, TaskId, TaskRecord};
use crate::ports::StoreStats;

type RecencyKey = (DateTime<Utc>, u64, TaskId);

#[derive(Debug)]
pub struct TaskIndex {
    tasks: HashMap<TaskId, TaskRecord>,
    by_tag: HashMap<Tag, BTreeSet<TaskId>>,
    /// Ascending by (last_seen, last_seq); iterate in reverse for "latest".
    by_recency: BTreeSet<RecencyKey>,
    num_reports: u64,
    next_seq: u64,
}

impl TaskIndex {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            by_tag: HashMap::new(),
            by_recency: BTreeSet::new(),
            num_reports: 0,
            next_seq: 1,
        }
    }

    /// Sequence number the next `apply` will assign.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Index a newly persisted report. Returns its sequence number.
    pub fn apply(
        &mut self,
        task_id: &TaskId,
        fields: &ReportFields,
        seen_at: DateTime<Utc>,
    ) -> u64 {
        let seq = self.next_seq;
        self.restore(task_id, fields, seen_at, seq);
        seq
    }

    /// Index a report read back from storage with its original sequence number.
    pub fn restore(
        &mut self,
        task_id: &TaskId,
        fields: &ReportFields,
        seen_at: DateTime<Utc>,
        seq: u64,
    ) {
        self.next_seq = self.next_seq.max(seq + 1);

        match self.tasks.get_mut(task_id) {
            Some(record) => {
                self.by_recency
                    .remove(&(record.last_seen, record.last_seq, task_id.clone()));
                record.observe(fields, seen_at, seq);
                self.by_recency
                    .insert((record.last_seen, record.last_seq, task_id.clone()));
            }
            None => {
                let mut record = TaskRecord::new(task_id.clone(), seen_at);
                record.observe(fields, seen_at, seq);
                self.by_recency
                    .insert((record.last_seen, record.last_seq, task_id.clone()));
                self.tasks.insert(task_id.clone(), record);
            }
        }

        for tag in &fields.tags {
            self.by_tag
                .entry(tag.clone())
                .or_default()
                .insert(task_id.clone());
        }
        self.num_reports += 1;
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn get(&self, task_id: &TaskId) -> Option<&TaskRecord> {
        self.tasks.get(task_id)
    }

    pub fn latest(&self, n: usize) -> Vec<TaskRecord> {
        self.by_recency
            .iter()
            .rev()
            .take(n)
            .filter_map(|(_, _, id)| self.tasks.get(id).cloned())
            .collect()
    }

    pub fn since(&self, since: DateTime<Utc>) -> Vec<TaskRecord> {
        self.by_recency
            .iter()
            .rev()
            .take_while(|(last_seen, _, _)| *last_seen >= since)
            .filter_map(|(_, _, id)| self.tasks.get(id).cloned())
            .collect()
    }

    /// Most recent first.
    pub fn by_tag(&self, tag: &Tag) -> Vec<TaskRecord> {
        let Some(ids) = self.by_tag.get(tag) else {
            return Vec::new();
        };
        let mut records: Vec<TaskRecord> =
            ids.iter().filter_map(|id| self.tasks.get(id).cloned()).collect();
        records.sort_by(|a, b| b.recency_key().cmp(&a.recency_key()));
        records
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            num_tasks: self.tasks.len() as u64,
            num_reports: self.num_reports,
        }
    }
}

impl Default for TaskIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Report;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn index_report(index: &mut TaskIndex, text: &str, secs: i64) -> u64 {
        let fields = ReportFields::parse(&Report::new(text));
        let task_id = fields.task_id.clone().unwrap();
        index.apply(&task_id, &fields, at(secs))
    }

    fn ids(records: &[TaskRecord]) -> Vec<&str> {
        records.iter().map(|r| r.task_id.as_str()).collect()
    }

    #[test]
    fn latest_orders_by_activity_and_breaks_ties_by_sequence() {
        let mut index = TaskIndex::new();
        index_report(&mut index, "R1:task=A", 0);
        index_report(&mut index, "R2:task=A", 0);
        index_report(&mut index, "R3:task=B", 0);

        assert_eq!(ids(&index.latest(2)), vec!["B", "A"]);
        assert_eq!(ids(&index.latest(10)), vec!["B", "A"]);
        assert_eq!(index.get(&TaskId::new("A")).unwrap().num_reports, 2);
    }

    #[test]
    fn update_moves_task_to_front() {
        let mut index = TaskIndex::new();
        index_report(&mut index, "task=A", 1);
        index_report(&mut index, "task=B", 2);
        index_report(&mut index, "task=A", 3);

        assert_eq!(ids(&index.latest(2)), vec!["A", "B"]);
        assert_eq!(index.stats().num_tasks, 2);
        assert_eq!(index.stats().num_reports, 3);
    }

    #[test]
    fn since_window_is_monotonic() {
        let mut index = TaskIndex::new();
        for (i, task) in ["A", "B", "C", "D"].iter().enumerate() {
            index_report(&mut index, &format!("task={task}"), i as i64 * 10);
        }

        let mut previous = 0;
        for secs in [40, 30, 20, 10, 0, -10] {
            let found = index.since(at(secs)).len();
            assert!(found >= previous, "window starting at {secs}s shrank");
            previous = found;
        }
        assert_eq!(ids(&index.since(at(20))), vec!["D", "C"]);
        assert_eq!(previous, 4);
    }

    #[test]
    fn by_tag_returns_matching_tasks_or_empty() {
        let mut index = TaskIndex::new();
        index_report(&mut index, "task=A tag=web", 1);
        index_report(&mut index, "task=B tag=db", 2);
        index_report(&mut index, "task=C tag=web", 3);

        assert_eq!(ids(&index.by_tag(&Tag::new("web"))), vec!["C", "A"]);
        assert!(index.by_tag(&Tag::new("missing")).is_empty());
    }

    #[test]
    fn restore_keeps_sequence_numbers_ahead_of_replayed_reports() {
        let mut index = TaskIndex::new();
        let fields = ReportFields::parse(&Report::new("task=A"));
        index.restore(&TaskId::new("A"), &fields, at(0), 41);

        assert_eq!(index.next_seq(), 42);
        assert_eq!(index_report(&mut index, "task=B", 1), 42);
    }
}
