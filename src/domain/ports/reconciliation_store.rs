//! Repository port for everything a reconciliation tick reads and writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{CompletedTaskRecord, LedgerEntry, OpenTaskRecord, RemovedTaskRecord};

/// Marks a prior completion as contradicted by later evidence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revocation {
    pub completion_id: Uuid,
    pub task_id: String,
    pub revoked_at: DateTime<Utc>,
}

/// All effects of one tick, applied together or not at all.
#[derive(Debug, Clone, Default)]
pub struct TickCommit {
    pub completed: Vec<CompletedTaskRecord>,
    pub removed: Vec<RemovedTaskRecord>,
    pub ledger: Vec<LedgerEntry>,
    pub revocations: Vec<Revocation>,
    /// The full fetched open set; ids not in it are pruned.
    pub open_snapshot: Vec<OpenTaskRecord>,
    pub cursor: DateTime<Utc>,
}

#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    /// Open tasks as of the last committed tick.
    async fn load_previous_open_snapshot(&self) -> DomainResult<Vec<OpenTaskRecord>>;

    /// Upsert every record into the open snapshot.
    async fn replace_open_snapshot(&self, tasks: &[OpenTaskRecord]) -> DomainResult<()>;

    /// Delete open rows whose id is not in `ids`. Returns rows removed.
    async fn prune_open_except(&self, ids: &[String]) -> DomainResult<u64>;

    async fn append_ledger_entry(&self, entry: &LedgerEntry) -> DomainResult<()>;

    async fn append_completed_record(&self, record: &CompletedTaskRecord) -> DomainResult<()>;

    async fn append_removed_record(&self, record: &RemovedTaskRecord) -> DomainResult<()>;

    /// Flag a completion as revoked. The row is kept.
    async fn revoke_completed_record(&self, revocation: &Revocation) -> DomainResult<()>;

    /// Latest unrevoked, non-recurring completion for `task_id`.
    async fn find_active_completion(&self, task_id: &str) -> DomainResult<Option<CompletedTaskRecord>>;

    /// Award paid for `completion_id` that no reversal entry cancels yet.
    async fn find_award_for_completion(&self, completion_id: Uuid) -> DomainResult<Option<LedgerEntry>>;

    async fn get_cursor(&self) -> DomainResult<Option<DateTime<Utc>>>;

    async fn set_cursor(&self, at: DateTime<Utc>) -> DomainResult<()>;

    /// Apply a whole tick.
    ///
    /// The default applies each effect in turn; stores that can should
    /// override this with a single transaction.
    async fn commit_tick(&self, commit: &TickCommit) -> DomainResult<()> {
        for record in &commit.completed {
            self.append_completed_record(record).await?;
        }
        for record in &commit.removed {
            self.append_removed_record(record).await?;
        }
        for entry in &commit.ledger {
            self.append_ledger_entry(entry).await?;
        }
        for revocation in &commit.revocations {
            self.revoke_completed_record(revocation).await?;
        }
        self.replace_open_snapshot(&commit.open_snapshot).await?;
        let ids: Vec<String> = commit.open_snapshot.iter().map(|t| t.id.clone()).collect();
        self.prune_open_except(&ids).await?;
        self.set_cursor(commit.cursor).await
    }

    /// Sum of every ledger amount.
    async fn balance(&self) -> DomainResult<i64>;

    /// Most recent ledger entries, newest first.
    async fn list_ledger(&self, limit: usize) -> DomainResult<Vec<LedgerEntry>>;

    async fn list_completed(&self) -> DomainResult<Vec<CompletedTaskRecord>>;

    async fn list_removed(&self) -> DomainResult<Vec<RemovedTaskRecord>>;
}
