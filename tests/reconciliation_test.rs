//! End-to-end reconciliation scenarios against SQLite.

mod common;

use chrono::{Duration, Utc};

use common::{hours_from_now, open_task, Harness};
use tickrewards::adapters::memory::ScriptedFailure;
use tickrewards::domain::models::{
    CompletionEvidence, DeadlineScope, LedgerSource, RemovalReason, RuleMode, RuleScope, TaskLookup,
};
use tickrewards::domain::ports::ReconciliationStore;
use tickrewards::domain::DomainError;
use tickrewards::services::{ClassifierConfig, ReconcilerConfig};

async fn snapshot_ids(h: &Harness) -> Vec<String> {
    h.store
        .load_previous_open_snapshot()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect()
}

#[tokio::test]
async fn test_confirmed_disappearance_is_scored_once() {
    let h = Harness::new().await;
    let exclusive = h.add_rule(RuleMode::Exclusive, RuleScope::Tag("urgent".into()), 10.0).await;
    h.add_rule(
        RuleMode::Additive,
        RuleScope::Deadline(DeadlineScope::WithinHours(24.0)),
        5.0,
    )
    .await;

    let task = open_task("t1", "Ship release")
        .with_tag("urgent")
        .with_due(hours_from_now(3));
    h.source.set_open_tasks(vec![task]).await;
    let first = h.orchestrator.run_tick().await.unwrap();
    assert_eq!(first.completed, 0);
    assert_eq!(snapshot_ids(&h).await, vec!["t1".to_string()]);

    let completed_at = Utc::now();
    h.source.set_open_tasks(vec![]).await;
    h.source
        .set_lookup(
            "t1",
            TaskLookup::Found {
                completed: true,
                completed_at: Some(completed_at),
            },
        )
        .await;
    let second = h.orchestrator.run_tick().await.unwrap();

    assert_eq!(second.completed, 1);
    assert_eq!(second.quarantined, 0);
    assert_eq!(second.points_awarded, 15);

    let completed = h.store.list_completed().await.unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].task_id, "t1");
    assert!(!completed[0].is_recurring_instance);
    assert!((completed[0].completed_at - completed_at).num_milliseconds().abs() < 1);

    let ledger = h.store.list_ledger(10).await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].amount, 15);
    assert_eq!(ledger[0].source, LedgerSource::Task);
    assert_eq!(ledger[0].related_task_id.as_deref(), Some("t1"));
    let meta: serde_json::Value = serde_json::from_str(&ledger[0].metadata_json).unwrap();
    assert_eq!(meta["breakdown"]["exclusiveRuleId"], exclusive);

    assert!(h.store.list_removed().await.unwrap().is_empty());
    assert!(snapshot_ids(&h).await.is_empty());

    // Nothing left to diff: a third tick awards nothing more.
    let third = h.orchestrator.run_tick().await.unwrap();
    assert_eq!(third.completed, 0);
    assert_eq!(h.store.balance().await.unwrap(), 15);
}

#[tokio::test]
async fn test_unconfirmed_disappearances_are_quarantined() {
    let h = Harness::new().await;
    h.add_rule(RuleMode::Additive, RuleScope::Project("P".into()), 5.0).await;

    h.source
        .set_open_tasks(vec![
            open_task("gone", "Deleted"),
            open_task("reopened", "Still open"),
            open_task("flaky", "Server error"),
        ])
        .await;
    h.orchestrator.run_tick().await.unwrap();

    h.source.set_open_tasks(vec![]).await;
    h.source.set_lookup("gone", TaskLookup::NotFound).await;
    h.source
        .set_lookup(
            "reopened",
            TaskLookup::Found {
                completed: false,
                completed_at: None,
            },
        )
        .await;
    h.source
        .set_lookup("flaky", TaskLookup::OtherError("status 500".into()))
        .await;

    let report = h.orchestrator.run_tick().await.unwrap();
    assert_eq!(report.completed, 0);
    assert_eq!(report.quarantined, 3);

    let mut removed: Vec<_> = h
        .store
        .list_removed()
        .await
        .unwrap()
        .into_iter()
        .map(|r| (r.task_id, r.reason))
        .collect();
    removed.sort();
    assert_eq!(
        removed,
        vec![
            ("flaky".to_string(), RemovalReason::Unknown),
            ("gone".to_string(), RemovalReason::DeletedOrMoved),
            ("reopened".to_string(), RemovalReason::DeletedOrMoved),
        ]
    );
    assert_eq!(h.store.balance().await.unwrap(), 0);
    assert!(h.store.list_completed().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_evidence_window_confirms_inconclusive_lookup() {
    let h = Harness::new().await;
    h.add_rule(RuleMode::Additive, RuleScope::Tag("home".into()), 3.0).await;

    h.source
        .set_open_tasks(vec![open_task("t1", "Laundry").with_tag("home")])
        .await;
    h.orchestrator.run_tick().await.unwrap();

    h.source.set_open_tasks(vec![]).await;
    h.source
        .set_lookup("t1", TaskLookup::OtherError("status 502".into()))
        .await;
    h.source
        .set_evidence(vec![CompletionEvidence {
            task_id: "t1".into(),
            completed_at: Utc::now(),
        }])
        .await;

    let report = h.orchestrator.run_tick().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(report.quarantined, 0);
    assert_eq!(h.store.balance().await.unwrap(), 3);
}

#[tokio::test]
async fn test_evidence_fallback_can_be_disabled() {
    let config = ReconcilerConfig {
        classifier: ClassifierConfig {
            evidence_window_fallback: false,
            ..ClassifierConfig::default()
        },
        ..ReconcilerConfig::default()
    };
    let h = Harness::with_config(config).await;

    h.source.set_open_tasks(vec![open_task("t1", "Laundry")]).await;
    h.orchestrator.run_tick().await.unwrap();

    h.source.set_open_tasks(vec![]).await;
    h.source
        .set_lookup("t1", TaskLookup::OtherError("status 502".into()))
        .await;
    h.source
        .set_evidence(vec![CompletionEvidence {
            task_id: "t1".into(),
            completed_at: Utc::now(),
        }])
        .await;

    let report = h.orchestrator.run_tick().await.unwrap();
    assert_eq!(report.completed, 0);
    assert_eq!(report.quarantined, 1);
}

#[tokio::test]
async fn test_rollover_records_recurring_completion() {
    let h = Harness::new().await;
    h.add_rule(RuleMode::Exclusive, RuleScope::Tag("habit".into()), 4.0).await;

    let due = hours_from_now(1);
    h.source
        .set_open_tasks(vec![open_task("r1", "Stretch").with_tag("habit").with_due(due)])
        .await;
    h.orchestrator.run_tick().await.unwrap();

    let next_due = due + Duration::days(1);
    h.source
        .set_open_tasks(vec![open_task("r1", "Stretch").with_tag("habit").with_due(next_due)])
        .await;
    let report = h.orchestrator.run_tick().await.unwrap();

    assert_eq!(report.rollovers, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(report.points_awarded, 4);

    let completed = h.store.list_completed().await.unwrap();
    assert_eq!(completed.len(), 1);
    assert!(completed[0].is_recurring_instance);
    assert_eq!(completed[0].series_key.as_deref(), Some("r1"));
    assert_eq!(completed[0].due_at, Some(due));

    let snapshot = h.store.load_previous_open_snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].due_at, Some(next_due));
    // The rollover needs no remote lookup.
    assert_eq!(h.source.lookup_count(), 0);
}

#[tokio::test]
async fn test_reappearance_revokes_award() {
    let h = Harness::new().await;
    h.add_rule(RuleMode::Additive, RuleScope::Project("P".into()), 10.0).await;

    h.source.set_open_tasks(vec![open_task("t1", "Taxes")]).await;
    h.orchestrator.run_tick().await.unwrap();

    h.source.set_open_tasks(vec![]).await;
    h.source
        .set_lookup(
            "t1",
            TaskLookup::Found {
                completed: true,
                completed_at: None,
            },
        )
        .await;
    h.orchestrator.run_tick().await.unwrap();
    assert_eq!(h.store.balance().await.unwrap(), 10);

    // The task is reopened on the remote.
    h.source.set_open_tasks(vec![open_task("t1", "Taxes")]).await;
    let report = h.orchestrator.run_tick().await.unwrap();
    assert_eq!(report.revoked, 1);
    assert_eq!(h.store.balance().await.unwrap(), 0);

    let completed = h.store.list_completed().await.unwrap();
    assert_eq!(completed.len(), 1, "revocation keeps the row");
    assert!(completed[0].revoked);
    assert!(completed[0].revoked_at.is_some());

    let ledger = h.store.list_ledger(10).await.unwrap();
    assert_eq!(ledger.len(), 2);
    assert_eq!(ledger[0].source, LedgerSource::TaskRevoked);
    assert_eq!(ledger[0].amount, -10);

    // Staying open does not revoke again.
    let again = h.orchestrator.run_tick().await.unwrap();
    assert_eq!(again.revoked, 0);
    assert_eq!(h.store.list_ledger(10).await.unwrap().len(), 2);

    // Completing it a second time awards again.
    h.source.set_open_tasks(vec![]).await;
    let report = h.orchestrator.run_tick().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(h.store.balance().await.unwrap(), 10);
}

#[tokio::test]
async fn test_revocation_can_be_disabled() {
    let config = ReconcilerConfig {
        revoke_on_reappearance: false,
        ..ReconcilerConfig::default()
    };
    let h = Harness::with_config(config).await;
    h.add_rule(RuleMode::Additive, RuleScope::Project("P".into()), 10.0).await;

    h.source.set_open_tasks(vec![open_task("t1", "Taxes")]).await;
    h.orchestrator.run_tick().await.unwrap();
    h.source.set_open_tasks(vec![]).await;
    h.source
        .set_lookup("t1", TaskLookup::Found { completed: true, completed_at: None })
        .await;
    h.orchestrator.run_tick().await.unwrap();

    h.source.set_open_tasks(vec![open_task("t1", "Taxes")]).await;
    let report = h.orchestrator.run_tick().await.unwrap();
    assert_eq!(report.revoked, 0);
    assert_eq!(h.store.balance().await.unwrap(), 10);
}

#[tokio::test]
async fn test_fetch_failure_leaves_state_untouched() {
    let h = Harness::new().await;
    h.source.set_open_tasks(vec![open_task("t1", "A")]).await;
    h.orchestrator.run_tick().await.unwrap();
    let cursor = h.store.get_cursor().await.unwrap();

    h.source.fail_fetch(Some(ScriptedFailure::Network)).await;
    let err = h.orchestrator.run_tick().await.unwrap_err();
    assert!(matches!(err, DomainError::Network(_)));

    assert_eq!(snapshot_ids(&h).await, vec!["t1".to_string()]);
    assert_eq!(h.store.get_cursor().await.unwrap(), cursor);
}

#[tokio::test]
async fn test_lookup_auth_failure_aborts_tick() {
    let h = Harness::new().await;
    h.add_rule(RuleMode::Additive, RuleScope::Project("P".into()), 1.0).await;
    h.source
        .set_open_tasks(vec![open_task("t1", "A"), open_task("t2", "B")])
        .await;
    h.orchestrator.run_tick().await.unwrap();

    h.source.set_open_tasks(vec![]).await;
    h.source.fail_lookups(Some(ScriptedFailure::AuthExpired)).await;
    let err = h.orchestrator.run_tick().await.unwrap_err();
    assert!(matches!(err, DomainError::AuthExpired(_)));

    assert_eq!(snapshot_ids(&h).await.len(), 2);
    assert!(h.store.list_completed().await.unwrap().is_empty());
    assert!(h.store.list_removed().await.unwrap().is_empty());

    // Once auth recovers the same disappearances are processed exactly once.
    h.source.fail_lookups(None).await;
    h.source
        .set_lookup("t1", TaskLookup::Found { completed: true, completed_at: None })
        .await;
    let report = h.orchestrator.run_tick().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(report.quarantined, 1);
}

#[tokio::test]
async fn test_snapshot_tracks_fetch_and_cursor_advances() {
    let h = Harness::new().await;

    let rounds = [
        vec!["a", "b", "c"],
        vec!["b", "c", "d"],
        vec!["d"],
        vec![],
    ];
    let mut last_cursor = None;
    for ids in rounds {
        let tasks = ids.iter().map(|id| open_task(id, id)).collect();
        h.source.set_open_tasks(tasks).await;
        h.orchestrator.run_tick().await.unwrap();

        let mut expected: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        expected.sort();
        assert_eq!(snapshot_ids(&h).await, expected);

        let cursor = h.store.get_cursor().await.unwrap();
        assert!(cursor > last_cursor);
        last_cursor = cursor;
    }

    // Every task that left the snapshot was accounted for exactly once.
    let completed = h.store.list_completed().await.unwrap().len();
    let removed = h.store.list_removed().await.unwrap().len();
    assert_eq!(completed + removed, 4);
}

#[tokio::test]
async fn test_unscorable_rule_still_records_completion() {
    let h = Harness::new().await;
    h.add_rule(RuleMode::Additive, RuleScope::TitleRegex("(".into()), 5.0).await;

    h.source.set_open_tasks(vec![open_task("t1", "A")]).await;
    h.orchestrator.run_tick().await.unwrap();
    h.source.set_open_tasks(vec![]).await;
    h.source
        .set_lookup("t1", TaskLookup::Found { completed: true, completed_at: None })
        .await;

    let report = h.orchestrator.run_tick().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(report.unscored, 1);
    assert_eq!(h.store.list_completed().await.unwrap().len(), 1);
    assert!(h.store.list_ledger(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_revocation_leaves_other_awards_for_the_task_alone() {
    let h = Harness::new().await;
    h.add_rule(RuleMode::Additive, RuleScope::Project("P".into()), 10.0).await;

    // A rollover pays the series once.
    let due = hours_from_now(1);
    h.source
        .set_open_tasks(vec![open_task("t1", "Water plants").with_due(due)])
        .await;
    h.orchestrator.run_tick().await.unwrap();
    h.source
        .set_open_tasks(vec![open_task("t1", "Water plants").with_due(due + Duration::days(1))])
        .await;
    assert_eq!(h.orchestrator.run_tick().await.unwrap().points_awarded, 10);

    // A broken rule leaves the final completion unscored.
    h.add_rule(RuleMode::Additive, RuleScope::TitleRegex("(".into()), 5.0).await;
    h.source.set_open_tasks(vec![]).await;
    h.source
        .set_lookup("t1", TaskLookup::Found { completed: true, completed_at: None })
        .await;
    let report = h.orchestrator.run_tick().await.unwrap();
    assert_eq!(report.unscored, 1);

    // Reopening revokes that completion without touching the rollover award.
    h.source.set_open_tasks(vec![open_task("t1", "Water plants")]).await;
    let report = h.orchestrator.run_tick().await.unwrap();
    assert_eq!(report.revoked, 1);
    assert_eq!(h.store.balance().await.unwrap(), 10);

    let ledger = h.store.list_ledger(10).await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].source, LedgerSource::Task);

    let completed = h.store.list_completed().await.unwrap();
    assert_eq!(completed.iter().filter(|c| c.revoked).count(), 1);
    assert!(completed.iter().any(|c| c.is_recurring_instance && !c.revoked));
}
