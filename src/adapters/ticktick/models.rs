//! TickTick Open API payloads.
//!
//! These structs map to the JSON returned by `/open/v1`. They stay inside
//! the adapter and are converted into domain records before leaving it.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::models::{CompletionEvidence, OpenTaskRecord, TaskLookup};

use super::date::parse_ticktick_date;

/// Status value TickTick uses for a completed task.
pub const STATUS_COMPLETED: i64 = 2;

/// A project (list) owned by the account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickTickProject {
    pub id: String,
    pub name: String,
    /// Archived projects report `closed: true`.
    #[serde(default)]
    pub closed: Option<bool>,
}

/// Response of `GET /project/{id}/data`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectData {
    #[serde(default)]
    pub tasks: Vec<TickTickTask>,
}

/// Response of `GET /project/{id}/completed`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletedTasksResponse {
    #[serde(default)]
    pub tasks: Vec<TickTickTask>,
}

/// A single task as the Open API returns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickTickTask {
    pub id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub completed_time: Option<String>,
    /// 0 = open, 2 = completed.
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub deleted: Option<i64>,
}

impl TickTickTask {
    pub fn is_completed(&self) -> bool {
        self.status == STATUS_COMPLETED
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.unwrap_or(0) != 0
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        parse_ticktick_date(self.completed_time.as_deref())
    }

    /// Convert into a snapshot row. `project` supplies the id fallback and
    /// the list name.
    pub fn into_open_record(self, project: &TickTickProject, seen_at: DateTime<Utc>) -> OpenTaskRecord {
        let due_at = parse_ticktick_date(self.due_date.as_deref());
        let created_at = parse_ticktick_date(self.created_time.as_deref());
        OpenTaskRecord {
            id: self.id,
            title: self.title,
            tags: self.tags.into_iter().collect::<BTreeSet<_>>(),
            list_name: Some(project.name.clone()),
            project_id: Some(self.project_id.unwrap_or_else(|| project.id.clone())),
            due_at,
            created_at,
            last_seen_at: seen_at,
            etag: self.etag,
        }
    }

    pub fn to_lookup(&self) -> TaskLookup {
        TaskLookup::Found {
            completed: self.is_completed(),
            completed_at: self.completed_at(),
        }
    }

    pub fn to_evidence(&self) -> Option<CompletionEvidence> {
        self.completed_at().map(|completed_at| CompletionEvidence {
            task_id: self.id.clone(),
            completed_at,
        })
    }
}
