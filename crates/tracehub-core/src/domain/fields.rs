//! ReportFields - report text から index 用のフィールドを取り出す
//!
//! Only the built-in stores use this; the backplane treats reports as opaque.
//!
//! Two forms are recognised on every line:
//! - `Key: value` headers (X-Trace style reports)
//! - `key=value` tokens separated by `:`, `;`, `,` or whitespace
//!
//! Keys are case-insensitive. `task` / `taskid` / `x-trace-task` name the task,
//! `tag` adds tags (comma-separated in header form), `title` sets the title.

use super::{Report, Tag, TaskId};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReportFields {
    pub task_id: Option<TaskId>,
    pub tags: Vec<Tag>,
    pub title: Option<String>,
}

impl ReportFields {
    pub fn parse(report: &Report) -> Self {
        let mut fields = Self::default();
        for line in report.as_str().lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some((key, value)) = line.split_once(": ")
                && !key.contains('=')
            {
                fields.apply_header(key.trim(), value.trim());
            }

            for token in line.split(|c: char| matches!(c, ':' | ';' | ',') || c.is_whitespace()) {
                if let Some((key, value)) = token.split_once('=') {
                    fields.apply(key, value.trim());
                }
            }
        }
        fields
    }

    fn apply_header(&mut self, key: &str, value: &str) {
        if key.eq_ignore_ascii_case("tag") {
            for tag in value.split(',') {
                self.push_tag(tag.trim());
            }
        } else {
            self.apply(key, value);
        }
    }

    fn apply(&mut self, key: &str, value: &str) {
        if value.is_empty() {
            return;
        }
        let key = key.to_ascii_lowercase();
        match key.as_str() {
            // first one wins
            "task" | "taskid" | "x-trace-task" => {
                if self.task_id.is_none() {
                    self.task_id = Some(TaskId::new(value));
                }
            }
            "tag" => self.push_tag(value),
            "title" => self.title = Some(value.to_string()),
            _ => {}
        }
    }

    fn push_tag(&mut self, tag: &str) {
        if tag.is_empty() || self.tags.iter().any(|t| t.as_str() == tag) {
            return;
        }
        self.tags.push(Tag::new(tag));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("R1:task=A", Some("A"))]
    #[case("R3:task=B", Some("B"))]
    #[case("X-Trace Report ver 1.0\nTask: 42\nHost: web-1", Some("42"))]
    #[case("TASKID=abc;op=7", Some("abc"))]
    #[case("X-Trace-Task: 0F1E", Some("0F1E"))]
    #[case("task=first task=second", Some("first"))]
    #[case("no identifier here", None)]
    #[case("task=", None)]
    fn extracts_task_id(#[case] text: &str, #[case] expected: Option<&str>) {
        let fields = ReportFields::parse(&Report::new(text));
        assert_eq!(fields.task_id.as_ref().map(TaskId::as_str), expected);
    }

    #[test]
    fn collects_tags_from_both_forms_without_duplicates() {
        let report = Report::new("Task: t1\nTag: web, slow\ntag=web tag=db");
        let fields = ReportFields::parse(&report);
        let tags: Vec<&str> = fields.tags.iter().map(Tag::as_str).collect();
        assert_eq!(tags, vec!["web", "slow", "db"]);
    }

    #[test]
    fn last_title_wins() {
        let report = Report::new("task=t1 title=first\nTitle: second");
        let fields = ReportFields::parse(&report);
        assert_eq!(fields.title.as_deref(), Some("second"));
    }
}
