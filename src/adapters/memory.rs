//! In-memory adapters.
//!
//! Used by tests and local experiments. The store keeps the same
//! invariants as the SQLite store: the ledger is append-only and completion
//! rows are only ever flagged as revoked.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    CompletedTaskRecord, CompletionEvidence, LedgerEntry, LedgerSource, OpenTaskRecord,
    RemovedTaskRecord, Rule, TagPriorityList, TaskLookup,
};
use crate::domain::ports::{ReconciliationStore, Revocation, RuleRepository, TaskSource};

#[derive(Debug, Default)]
struct StoreState {
    open: BTreeMap<String, OpenTaskRecord>,
    completed: Vec<CompletedTaskRecord>,
    removed: Vec<RemovedTaskRecord>,
    ledger: Vec<LedgerEntry>,
    cursor: Option<DateTime<Utc>>,
}

/// Reconciliation store backed by memory.
#[derive(Debug, Default)]
pub struct InMemoryReconciliationStore {
    state: RwLock<StoreState>,
}

impl InMemoryReconciliationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the open snapshot directly.
    pub async fn seed_open(&self, tasks: Vec<OpenTaskRecord>) {
        let mut state = self.state.write().await;
        state.open = tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
    }
}

fn metadata_str(entry: &LedgerEntry, key: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(&entry.metadata_json)
        .ok()
        .and_then(|v| v.get(key).and_then(|id| id.as_str()).map(String::from))
}

fn reversed_entry_ids(ledger: &[LedgerEntry]) -> Vec<String> {
    ledger
        .iter()
        .filter(|e| e.source == LedgerSource::TaskRevoked)
        .filter_map(|e| metadata_str(e, "reversedEntryId"))
        .collect()
}

#[async_trait]
impl ReconciliationStore for InMemoryReconciliationStore {
    async fn load_previous_open_snapshot(&self) -> DomainResult<Vec<OpenTaskRecord>> {
        Ok(self.state.read().await.open.values().cloned().collect())
    }

    async fn replace_open_snapshot(&self, tasks: &[OpenTaskRecord]) -> DomainResult<()> {
        let mut state = self.state.write().await;
        for task in tasks {
            state.open.insert(task.id.clone(), task.clone());
        }
        Ok(())
    }

    async fn prune_open_except(&self, ids: &[String]) -> DomainResult<u64> {
        let mut state = self.state.write().await;
        let before = state.open.len();
        state.open.retain(|id, _| ids.contains(id));
        Ok((before - state.open.len()) as u64)
    }

    async fn append_ledger_entry(&self, entry: &LedgerEntry) -> DomainResult<()> {
        self.state.write().await.ledger.push(entry.clone());
        Ok(())
    }

    async fn append_completed_record(&self, record: &CompletedTaskRecord) -> DomainResult<()> {
        self.state.write().await.completed.push(record.clone());
        Ok(())
    }

    async fn append_removed_record(&self, record: &RemovedTaskRecord) -> DomainResult<()> {
        self.state.write().await.removed.push(record.clone());
        Ok(())
    }

    async fn revoke_completed_record(&self, revocation: &Revocation) -> DomainResult<()> {
        let mut state = self.state.write().await;
        let record = state
            .completed
            .iter_mut()
            .find(|c| c.id == revocation.completion_id)
            .ok_or_else(|| {
                DomainError::ValidationFailed(format!(
                    "No completion {} to revoke",
                    revocation.completion_id
                ))
            })?;
        record.revoked = true;
        record.revoked_at = Some(revocation.revoked_at);
        Ok(())
    }

    async fn find_active_completion(&self, task_id: &str) -> DomainResult<Option<CompletedTaskRecord>> {
        let state = self.state.read().await;
        Ok(state
            .completed
            .iter()
            .filter(|c| c.task_id == task_id && !c.revoked && !c.is_recurring_instance)
            .max_by_key(|c| c.completed_at)
            .cloned())
    }

    async fn find_award_for_completion(&self, completion_id: Uuid) -> DomainResult<Option<LedgerEntry>> {
        let state = self.state.read().await;
        let reversed = reversed_entry_ids(&state.ledger);
        let wanted = completion_id.to_string();
        Ok(state
            .ledger
            .iter()
            .filter(|e| {
                e.source == LedgerSource::Task
                    && metadata_str(e, "completionId").as_deref() == Some(wanted.as_str())
                    && !reversed.contains(&e.id.to_string())
            })
            .max_by_key(|e| e.created_at)
            .cloned())
    }

    async fn get_cursor(&self) -> DomainResult<Option<DateTime<Utc>>> {
        Ok(self.state.read().await.cursor)
    }

    async fn set_cursor(&self, at: DateTime<Utc>) -> DomainResult<()> {
        self.state.write().await.cursor = Some(at);
        Ok(())
    }

    async fn balance(&self) -> DomainResult<i64> {
        Ok(self.state.read().await.ledger.iter().map(|e| e.amount).sum())
    }

    async fn list_ledger(&self, limit: usize) -> DomainResult<Vec<LedgerEntry>> {
        let state = self.state.read().await;
        let mut entries = state.ledger.clone();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn list_completed(&self) -> DomainResult<Vec<CompletedTaskRecord>> {
        Ok(self.state.read().await.completed.clone())
    }

    async fn list_removed(&self) -> DomainResult<Vec<RemovedTaskRecord>> {
        Ok(self.state.read().await.removed.clone())
    }
}

/// Rule repository backed by memory.
#[derive(Debug, Default)]
pub struct InMemoryRuleRepository {
    rules: RwLock<BTreeMap<i64, Rule>>,
    tag_priority: RwLock<TagPriorityList>,
}

impl InMemoryRuleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleRepository for InMemoryRuleRepository {
    async fn load_rules(&self) -> DomainResult<Vec<Rule>> {
        Ok(self.rules.read().await.values().cloned().collect())
    }

    async fn get(&self, id: i64) -> DomainResult<Option<Rule>> {
        Ok(self.rules.read().await.get(&id).cloned())
    }

    async fn insert(&self, rule: &Rule) -> DomainResult<i64> {
        let mut rules = self.rules.write().await;
        let id = rules.keys().next_back().map_or(1, |last| last + 1);
        let mut stored = rule.clone();
        stored.id = id;
        rules.insert(id, stored);
        Ok(id)
    }

    async fn update(&self, rule: &Rule) -> DomainResult<()> {
        let mut rules = self.rules.write().await;
        match rules.get_mut(&rule.id) {
            Some(existing) => {
                *existing = rule.clone();
                Ok(())
            }
            None => Err(DomainError::RuleNotFound(rule.id)),
        }
    }

    async fn delete(&self, id: i64) -> DomainResult<()> {
        self.rules
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(DomainError::RuleNotFound(id))
    }

    async fn load_tag_priority(&self) -> DomainResult<TagPriorityList> {
        Ok(self.tag_priority.read().await.clone())
    }

    async fn set_tag_priority(&self, tags: &TagPriorityList) -> DomainResult<()> {
        *self.tag_priority.write().await = tags.clone();
        Ok(())
    }
}

/// Failure a [`ScriptedTaskSource`] can be told to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    AuthExpired,
    Network,
    RateLimited,
    Timeout,
}

impl ScriptedFailure {
    fn to_error(self) -> DomainError {
        match self {
            Self::AuthExpired => DomainError::AuthExpired("scripted".to_string()),
            Self::Network => DomainError::Network("scripted".to_string()),
            Self::RateLimited => DomainError::RateLimited("scripted".to_string()),
            Self::Timeout => DomainError::Timeout(0),
        }
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    open: Vec<OpenTaskRecord>,
    lookups: HashMap<String, TaskLookup>,
    evidence: Vec<CompletionEvidence>,
    fetch_failure: Option<ScriptedFailure>,
    lookup_failure: Option<ScriptedFailure>,
    fetch_delay: Option<Duration>,
}

/// Task source whose answers are set by the caller.
///
/// Lookups for ids without a scripted answer return `NotFound`.
#[derive(Debug, Default)]
pub struct ScriptedTaskSource {
    script: RwLock<ScriptState>,
    fetches: AtomicUsize,
    lookups: AtomicUsize,
}

impl ScriptedTaskSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_open_tasks(&self, tasks: Vec<OpenTaskRecord>) {
        self.script.write().await.open = tasks;
    }

    pub async fn set_lookup(&self, task_id: &str, lookup: TaskLookup) {
        self.script
            .write()
            .await
            .lookups
            .insert(task_id.to_string(), lookup);
    }

    pub async fn set_evidence(&self, evidence: Vec<CompletionEvidence>) {
        self.script.write().await.evidence = evidence;
    }

    pub async fn fail_fetch(&self, failure: Option<ScriptedFailure>) {
        self.script.write().await.fetch_failure = failure;
    }

    pub async fn fail_lookups(&self, failure: Option<ScriptedFailure>) {
        self.script.write().await.lookup_failure = failure;
    }

    pub async fn set_fetch_delay(&self, delay: Duration) {
        self.script.write().await.fetch_delay = Some(delay);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskSource for ScriptedTaskSource {
    async fn fetch_open_tasks(&self) -> DomainResult<Vec<OpenTaskRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let (delay, failure, open) = {
            let script = self.script.read().await;
            (script.fetch_delay, script.fetch_failure, script.open.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(failure) => Err(failure.to_error()),
            None => Ok(open),
        }
    }

    async fn fetch_task(&self, _project_id: &str, task_id: &str) -> DomainResult<TaskLookup> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let script = self.script.read().await;
        if let Some(failure) = script.lookup_failure {
            return Err(failure.to_error());
        }
        Ok(script
            .lookups
            .get(task_id)
            .cloned()
            .unwrap_or(TaskLookup::NotFound))
    }

    async fn fetch_completions_since(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<CompletionEvidence>> {
        let script = self.script.read().await;
        Ok(script
            .evidence
            .iter()
            .filter(|e| e.completed_at > from && e.completed_at <= to)
            .cloned()
            .collect())
    }
}
