//! Reconciliation orchestrator.
//!
//! One tick walks `Fetching -> Diffing -> Classifying -> Scoring ->
//! Persisting` and lands back in `Idle`, or in `Errored` when any step
//! fails. Every effect of the tick is collected into a [`TickCommit`] and
//! handed to the store in one call, so a failed tick leaves persisted state
//! untouched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    CompletedTaskRecord, LedgerEntry, OpenTaskRecord, RecentCompletion, RemovedTaskRecord,
    Rule, SyncConfig, TagPriorityList, TaskTransactionMeta, TickPhase, TickReport,
};
use crate::domain::ports::{ReconciliationStore, Revocation, RuleRepository, TaskSource, TickCommit};
use crate::services::disappearance_classifier::{ClassifierConfig, DisappearanceClassifier};
use crate::services::rule_evaluator::RuleEvaluator;
use crate::services::snapshot_differ::SnapshotDiffer;

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Minimum due-date advance treated as a rollover.
    pub rollover_min_delta: Duration,
    /// Added on top of the cursor every tick.
    pub cursor_guard: Duration,
    /// Revoke completions whose task shows up open again.
    pub revoke_on_reappearance: bool,
    pub classifier: ClassifierConfig,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            rollover_min_delta: Duration::seconds(60),
            cursor_guard: Duration::milliseconds(1000),
            revoke_on_reappearance: true,
            classifier: ClassifierConfig::default(),
        }
    }
}

impl From<&SyncConfig> for ReconcilerConfig {
    fn from(sync: &SyncConfig) -> Self {
        Self {
            rollover_min_delta: Duration::seconds(sync.rollover_min_delta_secs),
            cursor_guard: Duration::milliseconds(sync.cursor_guard_ms),
            revoke_on_reappearance: sync.revoke_on_reappearance,
            classifier: ClassifierConfig::from(sync),
        }
    }
}

/// A completion ready to be scored and recorded.
struct PendingCompletion {
    record: OpenTaskRecord,
    completed_at: DateTime<Utc>,
    recurring: bool,
}

/// Runs reconciliation ticks against a task source and a store.
pub struct ReconciliationOrchestrator {
    source: Arc<dyn TaskSource>,
    store: Arc<dyn ReconciliationStore>,
    rules: Arc<dyn RuleRepository>,
    evaluator: RuleEvaluator,
    differ: SnapshotDiffer,
    classifier: DisappearanceClassifier,
    config: ReconcilerConfig,
    phase: Arc<RwLock<TickPhase>>,
    cancelled: Arc<AtomicBool>,
}

impl ReconciliationOrchestrator {
    pub fn new(
        source: Arc<dyn TaskSource>,
        store: Arc<dyn ReconciliationStore>,
        rules: Arc<dyn RuleRepository>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            classifier: DisappearanceClassifier::new(source.clone(), config.classifier.clone()),
            differ: SnapshotDiffer::new(config.rollover_min_delta),
            evaluator: RuleEvaluator::new(),
            source,
            store,
            rules,
            config,
            phase: Arc::new(RwLock::new(TickPhase::Idle)),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the evaluator (e.g. to pin the clock zone).
    pub fn with_evaluator(mut self, evaluator: RuleEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub async fn phase(&self) -> TickPhase {
        *self.phase.read().await
    }

    /// Ask the running tick to stop at the next step boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Clear a previous cancellation request.
    pub fn reset_cancellation(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Run one full tick.
    pub async fn run_tick(&self) -> DomainResult<TickReport> {
        let tick_id = Uuid::new_v4();
        let span = info_span!("reconcile_tick", %tick_id);

        async move {
            let result = self.tick(Utc::now()).await;
            match &result {
                Ok(report) => {
                    self.set_phase(TickPhase::Idle).await;
                    info!(
                        completed = report.completed,
                        rollovers = report.rollovers,
                        quarantined = report.quarantined,
                        revoked = report.revoked,
                        points = report.points_awarded,
                        open_tasks = report.open_tasks,
                        "Tick committed"
                    );
                }
                Err(e) => {
                    self.set_phase(TickPhase::Errored).await;
                    warn!(error = %e, "Tick failed, state left unchanged");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn tick(&self, started_at: DateTime<Utc>) -> DomainResult<TickReport> {
        self.enter(TickPhase::Fetching).await?;
        let mut current = self.source.fetch_open_tasks().await?;
        for task in &mut current {
            task.last_seen_at = started_at;
        }

        self.enter(TickPhase::Diffing).await?;
        let previous = self.store.load_previous_open_snapshot().await?;
        let diff = self.differ.diff(&previous, &current);
        debug!(
            previous = previous.len(),
            current = current.len(),
            disappeared = diff.disappeared.len(),
            rollovers = diff.rollovers.len(),
            appeared = diff.appeared_ids.len(),
            "Snapshot diffed"
        );

        self.enter(TickPhase::Classifying).await?;
        let classification = self
            .classifier
            .classify(diff.disappeared.clone(), started_at)
            .await?;
        debug!(
            confirmed = classification.confirmed.len(),
            quarantined = classification.quarantined.len(),
            "Disappearances classified"
        );

        self.enter(TickPhase::Scoring).await?;
        let rules = self.rules.load_rules().await?;
        let tag_priority = self.rules.load_tag_priority().await?;

        let mut pending: Vec<PendingCompletion> = diff
            .rollovers
            .iter()
            .map(|r| PendingCompletion {
                record: r.previous.clone(),
                completed_at: started_at,
                recurring: true,
            })
            .collect();
        pending.extend(classification.confirmed.into_iter().map(|c| PendingCompletion {
            completed_at: c.completed_at.unwrap_or(started_at),
            record: c.record,
            recurring: false,
        }));

        let mut commit = TickCommit::default();
        let mut report = TickReport {
            started_at: Some(started_at),
            rollovers: diff.rollovers.len(),
            ..Default::default()
        };

        for item in &pending {
            let mut completed =
                CompletedTaskRecord::from_open(&item.record, item.completed_at, item.recurring);
            if item.recurring {
                completed.series_key = Some(item.record.id.clone());
            }

            let points = self.score(item, completed.id, &rules, &tag_priority, &mut commit);
            match points {
                Some(p) => report.points_awarded += p,
                None => report.unscored += 1,
            }
            commit.completed.push(completed);

            report.recent.push(RecentCompletion {
                task_id: item.record.id.clone(),
                title: item.record.title.clone(),
                tags: item.record.tags.iter().cloned().collect(),
                project_id: item.record.project_id.clone(),
                due_at: item.record.due_at,
                completed_at: item.completed_at,
                is_recurring: item.recurring,
                points,
            });
        }
        report.completed = pending.len();

        for (record, reason) in &classification.quarantined {
            debug!(task_id = %record.id, reason = reason.as_str(), "Quarantined disappearance");
            commit
                .removed
                .push(RemovedTaskRecord::from_open(record, started_at, *reason));
        }
        report.quarantined = commit.removed.len();

        if self.config.revoke_on_reappearance {
            self.collect_revocations(&diff.appeared_ids, started_at, &mut commit)
                .await?;
            report.revoked = commit.revocations.len();
        }

        self.enter(TickPhase::Persisting).await?;
        let previous_cursor = self.store.get_cursor().await?;
        let cursor = next_cursor(previous_cursor, started_at, self.config.cursor_guard);

        report.open_tasks = current.len();
        report.next_cursor = Some(cursor);
        commit.open_snapshot = current;
        commit.cursor = cursor;

        self.store.commit_tick(&commit).await?;
        Ok(report)
    }

    // Returns the awarded points, or None when the task could not be scored.
    fn score(
        &self,
        item: &PendingCompletion,
        completion_id: Uuid,
        rules: &[Rule],
        tag_priority: &TagPriorityList,
        commit: &mut TickCommit,
    ) -> Option<i64> {
        let ctx = item.record.to_context(item.completed_at);
        let breakdown = match self.evaluator.evaluate(&ctx, rules, tag_priority) {
            Ok(breakdown) => breakdown,
            Err(e) => {
                warn!(task_id = %item.record.id, error = %e, "Skipping reward for task");
                return None;
            }
        };

        let points = breakdown.points_pre_penalty;
        let meta = TaskTransactionMeta::new(breakdown, ctx, item.recurring).for_completion(completion_id);
        match LedgerEntry::award(&meta, item.completed_at) {
            Ok(entry) => {
                commit.ledger.push(entry);
                Some(points)
            }
            Err(e) => {
                warn!(task_id = %item.record.id, error = %e, "Could not encode award metadata");
                None
            }
        }
    }

    async fn collect_revocations(
        &self,
        appeared_ids: &[String],
        revoked_at: DateTime<Utc>,
        commit: &mut TickCommit,
    ) -> DomainResult<()> {
        for task_id in appeared_ids {
            let Some(completion) = self.store.find_active_completion(task_id).await? else {
                continue;
            };
            info!(task_id = %task_id, completion_id = %completion.id, "Completed task reappeared, revoking");

            // Only the award tied to this completion is reversed; unscored completions have none.
            if let Some(award) = self.store.find_award_for_completion(completion.id).await? {
                commit
                    .ledger
                    .push(LedgerEntry::reversal(&award, completion.id, revoked_at));
            }
            commit.revocations.push(Revocation {
                completion_id: completion.id,
                task_id: task_id.clone(),
                revoked_at,
            });
        }
        Ok(())
    }

    async fn enter(&self, phase: TickPhase) -> DomainResult<()> {
        if self.is_cancelled() {
            return Err(DomainError::Cancelled(phase.as_str().to_string()));
        }
        self.set_phase(phase).await;
        Ok(())
    }

    async fn set_phase(&self, phase: TickPhase) {
        *self.phase.write().await = phase;
    }
}

/// `max(previous, tick_start) + guard`; never moves backwards.
pub fn next_cursor(
    previous: Option<DateTime<Utc>>,
    tick_start: DateTime<Utc>,
    guard: Duration,
) -> DateTime<Utc> {
    previous.map_or(tick_start, |prev| prev.max(tick_start)) + guard
}
