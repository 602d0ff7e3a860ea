//! Port for the remote task service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{CompletionEvidence, OpenTaskRecord, TaskLookup};

/// Read-only view of the third-party task service.
///
/// Implementations map transport failures onto `DomainError::AuthExpired`,
/// `Network`, `RateLimited` or `Timeout`; those abort the running tick.
/// A per-task answer that is merely unhelpful is reported as
/// [`TaskLookup::OtherError`] instead.
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Every task currently open on the remote, across all projects.
    async fn fetch_open_tasks(&self) -> DomainResult<Vec<OpenTaskRecord>>;

    /// Look one task up by its last-known project.
    async fn fetch_task(&self, project_id: &str, task_id: &str) -> DomainResult<TaskLookup>;

    /// Completions recorded by the remote in `(from, to]`.
    async fn fetch_completions_since(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<CompletionEvidence>>;
}
