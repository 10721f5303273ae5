use crate::models::{
    ListingPage, OutputOrder, RunSummary, Schema, TerminationReason, UserRecord,
};
use chrono::{NaiveDateTime, Utc};
use std::collections::HashSet;

/// Records keyed by handle. First seen wins; nothing is ever removed.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    records: Vec<UserRecord>,
    keys: HashSet<String>,
}

impl RecordSet {
    /// Merge a page's records, returning how many handles were new.
    pub fn merge(&mut self, page: impl IntoIterator<Item = UserRecord>) -> usize {
        let mut added = 0;
        for record in page {
            if record.handle.is_empty() || self.keys.contains(&record.handle) {
                continue;
            }
            self.keys.insert(record.handle.clone());
            self.records.push(record);
            added += 1;
        }
        added
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.keys.contains(handle)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ordered(&self, order: OutputOrder) -> Vec<&UserRecord> {
        let mut out: Vec<&UserRecord> = self.records.iter().collect();
        if order == OutputOrder::ByHandle {
            out.sort_by(|a, b| a.handle.cmp(&b.handle));
        }
        out
    }
}

/// Everything one pagination run produced. Owned by the engine while it
/// runs, handed over read-only afterwards.
#[derive(Debug, Clone)]
pub struct ExtractionRun {
    pub kind: String,
    pub target: String,
    pub order: OutputOrder,
    pub records: RecordSet,
    pub schema: Schema,
    pub pages: Vec<ListingPage>,
    pub reason: Option<TerminationReason>,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
}

impl ExtractionRun {
    pub fn new(kind: &str, target: &str, order: OutputOrder) -> Self {
        Self {
            kind: kind.to_string(),
            target: target.to_string(),
            order,
            records: RecordSet::default(),
            schema: Schema::default(),
            pages: Vec::new(),
            reason: None,
            started_at: Utc::now().naive_utc(),
            finished_at: None,
        }
    }

    pub(crate) fn terminate(&mut self, reason: TerminationReason) {
        self.reason = Some(reason);
        self.finished_at = Some(Utc::now().naive_utc());
    }

    pub fn records(&self) -> Vec<&UserRecord> {
        self.records.ordered(self.order)
    }

    pub fn handles(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.handle.clone()).collect()
    }

    pub fn column_ids(&self) -> Vec<String> {
        self.schema.ids()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            kind: self.kind.clone(),
            target: self.target.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at.unwrap_or(self.started_at),
            pages: self.pages.len(),
            records: self.records.len(),
            reason: self.reason.unwrap_or(TerminationReason::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(handles: &[&str]) -> Vec<UserRecord> {
        handles.iter().map(|h| UserRecord::from_handle(*h)).collect()
    }

    #[test]
    fn merging_twice_is_idempotent() {
        let mut set = RecordSet::default();
        assert_eq!(set.merge(page(&["b", "a", "c"])), 3);
        assert_eq!(set.merge(page(&["b", "a", "c"])), 0);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn new_count_never_exceeds_page_size() {
        let mut set = RecordSet::default();
        set.merge(page(&["a", "b"]));
        let p = page(&["b", "c", "c", ""]);
        let len = p.len();
        let new = set.merge(p);
        assert!(new <= len);
        assert_eq!(new, 1);
    }

    #[test]
    fn first_seen_wins() {
        let mut set = RecordSet::default();
        let mut first = UserRecord::from_handle("a");
        first.rank = Some("1".into());
        let mut later = UserRecord::from_handle("a");
        later.rank = Some("99".into());
        set.merge([first]);
        set.merge([later]);
        assert_eq!(set.ordered(OutputOrder::Insertion)[0].rank.as_deref(), Some("1"));
    }

    #[test]
    fn ordering() {
        let mut set = RecordSet::default();
        set.merge(page(&["zoe", "adam", "mia"]));
        let by_handle: Vec<_> = set.ordered(OutputOrder::ByHandle).iter().map(|r| r.handle.as_str()).collect();
        assert_eq!(by_handle, ["adam", "mia", "zoe"]);
        let inserted: Vec<_> = set.ordered(OutputOrder::Insertion).iter().map(|r| r.handle.as_str()).collect();
        assert_eq!(inserted, ["zoe", "adam", "mia"]);
    }
}
