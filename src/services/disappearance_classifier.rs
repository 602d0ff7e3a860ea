//! Disappearance classification.
//!
//! A task leaving the open set is only rewarded when the remote confirms it
//! was completed. Each candidate is looked up directly (by project and id)
//! through a small worker pool; lookups that come back inconclusive fall back
//! to one query of the remote's completion history. Anything still
//! unconfirmed is quarantined.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{OpenTaskRecord, RemovalReason, SyncConfig, TaskLookup};
use crate::domain::ports::TaskSource;

/// Configuration for the classifier.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Maximum concurrent direct lookups.
    pub concurrency: usize,
    /// Query completion history for inconclusive lookups.
    pub evidence_window_fallback: bool,
    /// How far back the evidence window may reach.
    pub max_lookback: chrono::Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            evidence_window_fallback: true,
            max_lookback: chrono::Duration::days(7),
        }
    }
}

impl From<&SyncConfig> for ClassifierConfig {
    fn from(sync: &SyncConfig) -> Self {
        Self {
            concurrency: sync.classifier_concurrency.max(1),
            evidence_window_fallback: sync.evidence_window_fallback,
            max_lookback: chrono::Duration::days(sync.initial_lookback_days),
        }
    }
}

/// A disappearance the remote confirmed as completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedCompletion {
    pub record: OpenTaskRecord,
    /// Completion time reported by the remote, when it gave one.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Outcome for a batch of disappeared tasks, each list ordered by task id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub confirmed: Vec<ConfirmedCompletion>,
    pub quarantined: Vec<(OpenTaskRecord, RemovalReason)>,
}

impl Classification {
    pub fn len(&self) -> usize {
        self.confirmed.len() + self.quarantined.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

enum Verdict {
    Completed(Option<DateTime<Utc>>),
    Removed(RemovalReason),
    Inconclusive(String),
}

/// Corroborates disappearances against the remote task service.
pub struct DisappearanceClassifier {
    source: Arc<dyn TaskSource>,
    config: ClassifierConfig,
}

impl DisappearanceClassifier {
    pub fn new(source: Arc<dyn TaskSource>, config: ClassifierConfig) -> Self {
        Self { source, config }
    }

    /// Classify every disappeared task.
    ///
    /// `window_end` closes the evidence window (normally the tick start).
    /// Remote failures (auth, network, rate limit, timeout) abort the batch.
    /// Request deadlines belong to the source: a lookup queued behind its
    /// rate limiter is not a timeout.
    pub async fn classify(
        &self,
        disappeared: Vec<OpenTaskRecord>,
        window_end: DateTime<Utc>,
    ) -> DomainResult<Classification> {
        let mut classification = Classification::default();
        if disappeared.is_empty() {
            return Ok(classification);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut handles = Vec::new();

        for record in disappeared {
            let Some(project_id) = record.project_id.clone() else {
                debug!(task_id = %record.id, "No project context, quarantining");
                classification
                    .quarantined
                    .push((record, RemovalReason::DeletedOrMoved));
                continue;
            };

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| DomainError::ValidationFailed("Classifier semaphore closed".to_string()))?;

            let source = self.source.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let verdict = lookup(source.as_ref(), &project_id, &record.id).await;
                (record, verdict)
            });
            handles.push(handle);
        }

        let mut inconclusive = Vec::new();
        let mut abort: Option<DomainError> = None;

        for handle in handles {
            let (record, verdict) = match handle.await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "Lookup worker failed");
                    abort.get_or_insert(DomainError::ValidationFailed(format!("lookup worker failed: {e}")));
                    continue;
                }
            };
            match verdict {
                Ok(Verdict::Completed(completed_at)) => classification
                    .confirmed
                    .push(ConfirmedCompletion { record, completed_at }),
                Ok(Verdict::Removed(reason)) => classification.quarantined.push((record, reason)),
                Ok(Verdict::Inconclusive(reason)) => {
                    debug!(task_id = %record.id, %reason, "Lookup inconclusive");
                    inconclusive.push(record);
                }
                Err(e) => {
                    abort.get_or_insert(e);
                }
            }
        }

        if let Some(err) = abort {
            return Err(err);
        }

        if !inconclusive.is_empty() {
            self.resolve_with_evidence(inconclusive, window_end, &mut classification)
                .await?;
        }

        classification.confirmed.sort_by(|a, b| a.record.id.cmp(&b.record.id));
        classification.quarantined.sort_by(|a, b| a.0.id.cmp(&b.0.id));
        Ok(classification)
    }

    async fn resolve_with_evidence(
        &self,
        inconclusive: Vec<OpenTaskRecord>,
        window_end: DateTime<Utc>,
        classification: &mut Classification,
    ) -> DomainResult<()> {
        if !self.config.evidence_window_fallback {
            classification
                .quarantined
                .extend(inconclusive.into_iter().map(|r| (r, RemovalReason::Unknown)));
            return Ok(());
        }

        let earliest_seen = inconclusive
            .iter()
            .map(|r| r.last_seen_at)
            .min()
            .unwrap_or(window_end);
        let floor = window_end - self.config.max_lookback;
        let window_start = earliest_seen.max(floor).min(window_end);

        let evidence = match self
            .source
            .fetch_completions_since(window_start, window_end)
            .await
        {
            Ok(evidence) => evidence,
            Err(e) if e.is_remote_failure() => return Err(e),
            Err(e) => {
                warn!(error = %e, "Completion history unavailable, quarantining inconclusive tasks");
                Vec::new()
            }
        };

        let completions: HashMap<&str, DateTime<Utc>> = evidence
            .iter()
            .filter(|e| e.completed_at > window_start && e.completed_at <= window_end)
            .map(|e| (e.task_id.as_str(), e.completed_at))
            .collect();

        for record in inconclusive {
            match completions.get(record.id.as_str()) {
                Some(at) => classification.confirmed.push(ConfirmedCompletion {
                    record,
                    completed_at: Some(*at),
                }),
                None => classification.quarantined.push((record, RemovalReason::Unknown)),
            }
        }

        Ok(())
    }
}

async fn lookup(source: &dyn TaskSource, project_id: &str, task_id: &str) -> DomainResult<Verdict> {
    match source.fetch_task(project_id, task_id).await {
        Ok(TaskLookup::Found { completed: true, completed_at }) => Ok(Verdict::Completed(completed_at)),
        Ok(TaskLookup::Found { completed: false, .. }) | Ok(TaskLookup::NotFound) => {
            Ok(Verdict::Removed(RemovalReason::DeletedOrMoved))
        }
        Ok(TaskLookup::OtherError(reason)) => Ok(Verdict::Inconclusive(reason)),
        Err(e) if e.is_remote_failure() => Err(e),
        Err(e) => Ok(Verdict::Inconclusive(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::CompletionEvidence;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct StubSource {
        lookups: HashMap<String, TaskLookup>,
        evidence: Vec<CompletionEvidence>,
        fail_lookup_with_auth: bool,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        evidence_calls: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
    }

    #[async_trait]
    impl TaskSource for StubSource {
        async fn fetch_open_tasks(&self) -> DomainResult<Vec<OpenTaskRecord>> {
            Ok(vec![])
        }

        async fn fetch_task(&self, _project_id: &str, task_id: &str) -> DomainResult<TaskLookup> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_lookup_with_auth {
                return Err(DomainError::AuthExpired("token revoked".into()));
            }
            Ok(self.lookups.get(task_id).cloned().unwrap_or(TaskLookup::NotFound))
        }

        async fn fetch_completions_since(
            &self,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> DomainResult<Vec<CompletionEvidence>> {
            self.evidence_calls.lock().unwrap().push((from, to));
            Ok(self.evidence.clone())
        }
    }

    fn t(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, h, 0, 0).unwrap()
    }

    fn record(id: &str) -> OpenTaskRecord {
        OpenTaskRecord::new(id, id, t(8)).with_project("p1")
    }

    fn classifier(source: StubSource) -> (DisappearanceClassifier, Arc<StubSource>) {
        let source = Arc::new(source);
        (
            DisappearanceClassifier::new(source.clone(), ClassifierConfig::default()),
            source,
        )
    }

    #[tokio::test]
    async fn test_direct_lookup_outcomes() {
        let mut lookups = HashMap::new();
        lookups.insert("done".to_string(), TaskLookup::Found { completed: true, completed_at: Some(t(9)) });
        lookups.insert("open".to_string(), TaskLookup::Found { completed: false, completed_at: None });
        let (classifier, _) = classifier(StubSource { lookups, ..Default::default() });

        let result = classifier
            .classify(vec![record("open"), record("done"), record("gone")], t(10))
            .await
            .unwrap();

        assert_eq!(result.confirmed.len(), 1);
        assert_eq!(result.confirmed[0].record.id, "done");
        assert_eq!(result.confirmed[0].completed_at, Some(t(9)));
        let removed: Vec<_> = result.quarantined.iter().map(|(r, reason)| (r.id.as_str(), *reason)).collect();
        assert_eq!(
            removed,
            vec![("gone", RemovalReason::DeletedOrMoved), ("open", RemovalReason::DeletedOrMoved)]
        );
    }

    #[tokio::test]
    async fn test_missing_project_is_quarantined_without_lookup() {
        let (classifier, source) = classifier(StubSource::default());
        let orphan = OpenTaskRecord::new("orphan", "Orphan", t(8));

        let result = classifier.classify(vec![orphan], t(10)).await.unwrap();
        assert!(result.confirmed.is_empty());
        assert_eq!(result.quarantined[0].1, RemovalReason::DeletedOrMoved);
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_inconclusive_falls_back_to_evidence_window() {
        let mut lookups = HashMap::new();
        lookups.insert("a".to_string(), TaskLookup::OtherError("HTTP 500".into()));
        lookups.insert("b".to_string(), TaskLookup::OtherError("HTTP 500".into()));
        let evidence = vec![
            CompletionEvidence { task_id: "a".into(), completed_at: t(9) },
            CompletionEvidence { task_id: "b".into(), completed_at: t(11) },
        ];
        let (classifier, source) = classifier(StubSource { lookups, evidence, ..Default::default() });

        let result = classifier.classify(vec![record("a"), record("b")], t(10)).await.unwrap();

        assert_eq!(result.confirmed.len(), 1);
        assert_eq!(result.confirmed[0].record.id, "a");
        assert_eq!(result.quarantined, vec![(record("b"), RemovalReason::Unknown)]);
        assert_eq!(*source.evidence_calls.lock().unwrap(), vec![(t(8), t(10))]);
    }

    #[tokio::test]
    async fn test_fallback_disabled_quarantines_as_unknown() {
        let mut lookups = HashMap::new();
        lookups.insert("a".to_string(), TaskLookup::OtherError("HTTP 502".into()));
        let source = Arc::new(StubSource { lookups, ..Default::default() });
        let config = ClassifierConfig { evidence_window_fallback: false, ..Default::default() };
        let classifier = DisappearanceClassifier::new(source.clone(), config);

        let result = classifier.classify(vec![record("a")], t(10)).await.unwrap();
        assert_eq!(result.quarantined, vec![(record("a"), RemovalReason::Unknown)]);
        assert!(source.evidence_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remote_failure_aborts() {
        let (classifier, _) = classifier(StubSource { fail_lookup_with_auth: true, ..Default::default() });
        let err = classifier.classify(vec![record("a")], t(10)).await.unwrap_err();
        assert!(matches!(err, DomainError::AuthExpired(_)));
    }

    #[tokio::test]
    async fn test_lookups_are_bounded() {
        let (classifier, source) = classifier(StubSource {
            delay: Duration::from_millis(20),
            ..Default::default()
        });
        let records: Vec<_> = (0..12).map(|i| record(&format!("t{i:02}"))).collect();

        let result = classifier.classify(records, t(10)).await.unwrap();
        assert_eq!(result.quarantined.len(), 12);
        assert!(source.max_in_flight.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn test_evidence_at_window_start_is_excluded() {
        let mut lookups = HashMap::new();
        lookups.insert("a".to_string(), TaskLookup::OtherError("HTTP 500".into()));
        let evidence = vec![CompletionEvidence { task_id: "a".into(), completed_at: t(8) }];
        let (classifier, _) = classifier(StubSource { lookups, evidence, ..Default::default() });

        // The window is (t(8), t(10)]; a completion at its open end predates the last sighting.
        let result = classifier.classify(vec![record("a")], t(10)).await.unwrap();
        assert!(result.confirmed.is_empty());
        assert_eq!(result.quarantined, vec![(record("a"), RemovalReason::Unknown)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookups_queued_behind_a_slow_source_still_resolve() {
        // Eight lookups through two workers, each held for a full rate-limit window.
        let source = Arc::new(StubSource {
            delay: Duration::from_secs(60),
            ..Default::default()
        });
        let config = ClassifierConfig { concurrency: 2, ..Default::default() };
        let classifier = DisappearanceClassifier::new(source.clone(), config);
        let records: Vec<_> = (0..8).map(|i| record(&format!("t{i}"))).collect();

        let result = classifier.classify(records, t(10)).await.unwrap();
        assert_eq!(result.quarantined.len(), 8);
        assert!(result
            .quarantined
            .iter()
            .all(|(_, reason)| *reason == RemovalReason::DeletedOrMoved));
    }
}
