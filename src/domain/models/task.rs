//! Task records mirrored from the remote task service.
//!
//! `OpenTaskRecord` is the last-known snapshot row. Every id that leaves the
//! open snapshot ends up as exactly one `CompletedTaskRecord` (confirmed) or
//! `RemovedTaskRecord` (quarantined).

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A task believed to be open as of the last successful tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenTaskRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub list_name: Option<String>,
    pub project_id: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_seen_at: DateTime<Utc>,
    /// Opaque version marker from the remote, if it exposes one.
    pub etag: Option<String>,
}

impl OpenTaskRecord {
    pub fn new(id: impl Into<String>, title: impl Into<String>, last_seen_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            tags: BTreeSet::new(),
            list_name: None,
            project_id: None,
            due_at: None,
            created_at: None,
            last_seen_at,
            etag: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_list(mut self, list_name: impl Into<String>) -> Self {
        self.list_name = Some(list_name.into());
        self
    }

    pub fn with_due(mut self, due_at: DateTime<Utc>) -> Self {
        self.due_at = Some(due_at);
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    /// Build the evaluator input for a completion of this task.
    pub fn to_context(&self, completed_at: DateTime<Utc>) -> TaskContext {
        TaskContext {
            id: self.id.clone(),
            title: self.title.clone(),
            tags: self.tags.clone(),
            list: self.list_name.clone(),
            project: self.project_id.clone(),
            completed_at,
            due_at: self.due_at,
        }
    }
}

/// A confirmed completion. Append-mostly: only `revoked`/`revoked_at` change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedTaskRecord {
    pub id: Uuid,
    pub task_id: String,
    pub title: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub project_id: Option<String>,
    pub list_name: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
    pub is_recurring_instance: bool,
    pub series_key: Option<String>,
    #[serde(default)]
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl CompletedTaskRecord {
    pub fn from_open(
        record: &OpenTaskRecord,
        completed_at: DateTime<Utc>,
        is_recurring_instance: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id: record.id.clone(),
            title: record.title.clone(),
            tags: record.tags.clone(),
            project_id: record.project_id.clone(),
            list_name: record.list_name.clone(),
            due_at: record.due_at,
            completed_at,
            is_recurring_instance,
            series_key: None,
            revoked: false,
            revoked_at: None,
        }
    }
}

/// Why a disappeared task was quarantined instead of rewarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// The remote says the task is gone or no longer completed-looking.
    DeletedOrMoved,
    /// No evidence either way.
    Unknown,
}

impl RemovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeletedOrMoved => "deleted_or_moved",
            Self::Unknown => "unknown",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "deleted_or_moved" => Some(Self::DeletedOrMoved),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// A disappearance that could not be confirmed as a completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedTaskRecord {
    pub id: Uuid,
    pub task_id: String,
    pub title: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub project_id: Option<String>,
    pub list_name: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub removed_at: DateTime<Utc>,
    pub reason: RemovalReason,
}

impl RemovedTaskRecord {
    pub fn from_open(record: &OpenTaskRecord, removed_at: DateTime<Utc>, reason: RemovalReason) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id: record.id.clone(),
            title: record.title.clone(),
            tags: record.tags.clone(),
            project_id: record.project_id.clone(),
            list_name: record.list_name.clone(),
            due_at: record.due_at,
            removed_at,
            reason,
        }
    }
}

/// Everything the rule evaluator needs to know about one completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskContext {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub list: Option<String>,
    pub project: Option<String>,
    pub completed_at: DateTime<Utc>,
    pub due_at: Option<DateTime<Utc>>,
}

/// Result of looking a single task up on the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskLookup {
    Found {
        completed: bool,
        completed_at: Option<DateTime<Utc>>,
    },
    NotFound,
    /// The remote answered, but not with anything usable (5xx, bad payload).
    OtherError(String),
}

/// One entry of the remote's completion history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEvidence {
    pub task_id: String,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removal_reason_round_trip() {
        for reason in [RemovalReason::DeletedOrMoved, RemovalReason::Unknown] {
            assert_eq!(RemovalReason::from_str(reason.as_str()), Some(reason));
        }
        assert_eq!(RemovalReason::from_str("archived"), None);
    }

    #[test]
    fn test_context_carries_snapshot_fields() {
        let now = Utc::now();
        let record = OpenTaskRecord::new("t1", "Write report", now)
            .with_tag("work")
            .with_project("p1")
            .with_list("Inbox");
        let ctx = record.to_context(now);
        assert_eq!(ctx.project.as_deref(), Some("p1"));
        assert_eq!(ctx.list.as_deref(), Some("Inbox"));
        assert!(ctx.tags.contains("work"));
        assert_eq!(ctx.completed_at, now);
    }

    #[test]
    fn test_completed_record_starts_unrevoked() {
        let now = Utc::now();
        let record = CompletedTaskRecord::from_open(&OpenTaskRecord::new("t1", "x", now), now, true);
        assert!(!record.revoked);
        assert!(record.revoked_at.is_none());
        assert!(record.is_recurring_instance);
    }
}
