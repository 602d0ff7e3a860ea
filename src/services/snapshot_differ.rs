//! Snapshot diffing between the last persisted open set and a fresh fetch.

use std::collections::{BTreeMap, HashSet};

use chrono::Duration;

use crate::domain::models::OpenTaskRecord;

/// A recurring task whose due date moved forward under the same id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rollover {
    /// The occurrence that was completed.
    pub previous: OpenTaskRecord,
    /// The newly generated occurrence.
    pub current: OpenTaskRecord,
}

/// Output of [`SnapshotDiffer::diff`]. All vectors are ordered by task id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    /// Previously open tasks missing from the fetch.
    pub disappeared: Vec<OpenTaskRecord>,
    pub rollovers: Vec<Rollover>,
    /// Fetched ids that were not in the previous snapshot.
    pub appeared_ids: Vec<String>,
}

impl DiffResult {
    pub fn disappeared_ids(&self) -> Vec<String> {
        self.disappeared.iter().map(|t| t.id.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.disappeared.is_empty() && self.rollovers.is_empty() && self.appeared_ids.is_empty()
    }
}

/// Compares open-task snapshots.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotDiffer {
    min_rollover_delta: Duration,
}

impl Default for SnapshotDiffer {
    fn default() -> Self {
        Self::new(Duration::seconds(60))
    }
}

impl SnapshotDiffer {
    pub fn new(min_rollover_delta: Duration) -> Self {
        Self { min_rollover_delta }
    }

    pub fn diff(&self, previous: &[OpenTaskRecord], current: &[OpenTaskRecord]) -> DiffResult {
        let prev_by_id: BTreeMap<&str, &OpenTaskRecord> =
            previous.iter().map(|t| (t.id.as_str(), t)).collect();
        let curr_by_id: BTreeMap<&str, &OpenTaskRecord> =
            current.iter().map(|t| (t.id.as_str(), t)).collect();

        let mut result = DiffResult::default();

        for (id, prev) in &prev_by_id {
            match curr_by_id.get(id) {
                None => result.disappeared.push((*prev).clone()),
                Some(curr) if self.is_rollover(prev, curr) => result.rollovers.push(Rollover {
                    previous: (*prev).clone(),
                    current: (*curr).clone(),
                }),
                Some(_) => {}
            }
        }

        let prev_ids: HashSet<&str> = prev_by_id.keys().copied().collect();
        result.appeared_ids = curr_by_id
            .keys()
            .filter(|id| !prev_ids.contains(*id))
            .map(|id| id.to_string())
            .collect();

        result
    }

    /// Due date advanced by at least the threshold, or the version marker
    /// changed together with any due-date change.
    pub fn is_rollover(&self, prev: &OpenTaskRecord, curr: &OpenTaskRecord) -> bool {
        if let (Some(prev_due), Some(curr_due)) = (prev.due_at, curr.due_at) {
            if curr_due - prev_due >= self.min_rollover_delta {
                return true;
            }
        }

        let etag_changed = match (&prev.etag, &curr.etag) {
            (Some(a), Some(b)) => a != b,
            _ => false,
        };
        etag_changed && prev.due_at != curr.due_at
    }
}
