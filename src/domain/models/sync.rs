//! Reconciliation tick state, results and observer events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase of the reconciliation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickPhase {
    Idle,
    Fetching,
    Diffing,
    Classifying,
    Scoring,
    Persisting,
    Errored,
}

impl TickPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Diffing => "diffing",
            Self::Classifying => "classifying",
            Self::Scoring => "scoring",
            Self::Persisting => "persisting",
            Self::Errored => "errored",
        }
    }
}

/// Summary of one successful tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub started_at: Option<DateTime<Utc>>,
    /// Confirmed completions (rollovers + classified disappearances).
    pub completed: usize,
    pub rollovers: usize,
    pub quarantined: usize,
    /// Completions persisted without a ledger entry because scoring failed.
    pub unscored: usize,
    pub revoked: usize,
    pub points_awarded: i64,
    pub open_tasks: usize,
    pub next_cursor: Option<DateTime<Utc>>,
    pub recent: Vec<RecentCompletion>,
}

/// A confirmed completion, kept in the scheduler's ring buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentCompletion {
    pub task_id: String,
    pub title: String,
    pub tags: Vec<String>,
    pub project_id: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
    pub is_recurring: bool,
    /// `None` when the completion could not be scored.
    pub points: Option<i64>,
}

/// Fire-and-forget notification emitted after every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusEvent {
    pub success: bool,
    pub completed_count: usize,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time view of the poll scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub last_sync_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub polling: bool,
    pub poll_interval_secs: u64,
    pub backoff_ms: u64,
    pub next_run_in_ms: Option<u64>,
    pub consecutive_failures: u32,
}
