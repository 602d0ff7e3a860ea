//! Poll scheduler behaviour under paused time.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use tickrewards::adapters::memory::{
    InMemoryReconciliationStore, InMemoryRuleRepository, ScriptedFailure, ScriptedTaskSource,
};
use tickrewards::domain::models::{OpenTaskRecord, TaskLookup};
use tickrewards::services::poll_scheduler::SchedulerConfig;
use tickrewards::services::{PollScheduler, ReconcilerConfig, ReconciliationOrchestrator};

fn scheduler_with(source: Arc<ScriptedTaskSource>, interval_secs: u64, recent_capacity: usize) -> PollScheduler {
    let orchestrator = ReconciliationOrchestrator::new(
        source,
        Arc::new(InMemoryReconciliationStore::new()),
        Arc::new(InMemoryRuleRepository::new()),
        ReconcilerConfig::default(),
    );
    PollScheduler::new(
        Arc::new(orchestrator),
        SchedulerConfig {
            poll_interval: Duration::from_secs(interval_secs),
            max_backoff_factor: 5,
            recent_capacity,
        },
    )
}

fn open(id: &str) -> OpenTaskRecord {
    OpenTaskRecord::new(id, format!("Task {id}"), Utc::now()).with_project("P")
}

fn done() -> TaskLookup {
    TaskLookup::Found {
        completed: true,
        completed_at: Some(Utc::now()),
    }
}

#[tokio::test(start_paused = true)]
async fn test_start_runs_a_tick_immediately() {
    let source = Arc::new(ScriptedTaskSource::new());
    let scheduler = scheduler_with(source.clone(), 60, 10);
    let mut events = scheduler.subscribe();

    scheduler.start(None).await;
    let event = events.recv().await.unwrap();

    assert!(event.success);
    assert_eq!(event.completed_count, 0);
    assert_eq!(source.fetch_count(), 1);
    assert!(scheduler.is_polling().await);
    assert!(scheduler.status().await.last_sync_at.is_some());

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_completions_reach_event_and_recent_buffer() {
    let source = Arc::new(ScriptedTaskSource::new());
    source.set_open_tasks(vec![open("a"), open("b")]).await;
    let scheduler = scheduler_with(source.clone(), 10, 10);
    let mut events = scheduler.subscribe();

    scheduler.start(None).await;
    assert!(events.recv().await.unwrap().success);
    assert!(scheduler.recent().await.is_empty());

    source.set_open_tasks(vec![open("b")]).await;
    source.set_lookup("a", done()).await;

    let event = events.recv().await.unwrap();
    assert!(event.success);
    assert_eq!(event.completed_count, 1);

    let recent = scheduler.recent().await;
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].task_id, "a");
    assert_eq!(recent[0].title, "Task a");
    assert_eq!(source.fetch_count(), 2);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_recent_buffer_is_bounded() {
    let source = Arc::new(ScriptedTaskSource::new());
    source.set_open_tasks(vec![open("a"), open("b"), open("c")]).await;
    let scheduler = scheduler_with(source.clone(), 10, 2);

    scheduler.run_now().await.unwrap();
    source.set_open_tasks(vec![]).await;
    for id in ["a", "b", "c"] {
        source.set_lookup(id, done()).await;
    }
    let report = scheduler.run_now().await.unwrap().unwrap();

    assert_eq!(report.completed, 3);
    assert_eq!(scheduler.recent().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_future_ticks() {
    let source = Arc::new(ScriptedTaskSource::new());
    let scheduler = scheduler_with(source.clone(), 10, 10);
    let mut events = scheduler.subscribe();

    scheduler.start(None).await;
    events.recv().await.unwrap();
    scheduler.stop().await;

    let status = scheduler.status().await;
    assert!(!status.polling);
    assert_eq!(status.next_run_in_ms, None);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(source.fetch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_set_interval_reschedules_running_timer() {
    let source = Arc::new(ScriptedTaskSource::new());
    let scheduler = scheduler_with(source.clone(), 600, 10);
    let mut events = scheduler.subscribe();

    scheduler.start(None).await;
    events.recv().await.unwrap();

    scheduler.set_interval(Duration::from_secs(5)).await;
    assert_eq!(scheduler.status().await.poll_interval_secs, 5);

    let next = tokio::time::timeout(Duration::from_secs(6), events.recv()).await;
    assert!(next.is_ok(), "tick should follow the new interval");
    assert_eq!(source.fetch_count(), 2);

    // Zero is ignored.
    scheduler.set_interval(Duration::ZERO).await;
    assert_eq!(scheduler.status().await.poll_interval_secs, 5);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_start_interval_override() {
    let source = Arc::new(ScriptedTaskSource::new());
    let scheduler = scheduler_with(source, 600, 10);

    scheduler.start(Some(Duration::from_secs(30))).await;
    assert_eq!(scheduler.status().await.poll_interval_secs, 30);
    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_tick_schedules_backoff() {
    let source = Arc::new(ScriptedTaskSource::new());
    source.fail_fetch(Some(ScriptedFailure::AuthExpired)).await;
    let scheduler = scheduler_with(source.clone(), 10, 10);
    let mut events = scheduler.subscribe();

    scheduler.start(None).await;
    let event = events.recv().await.unwrap();
    assert!(!event.success);
    assert!(event.error.is_some());

    // Let the loop compute its next delay.
    tokio::time::sleep(Duration::from_millis(1)).await;
    let status = scheduler.status().await;
    assert_eq!(status.consecutive_failures, 1);
    assert_eq!(status.backoff_ms, 20_000);
    let next = status.next_run_in_ms.expect("next run should be scheduled");
    assert!(next > 10_000 && next <= 20_000);

    // Recovery resets the delay.
    source.fail_fetch(None).await;
    let event = events.recv().await.unwrap();
    assert!(event.success);
    assert_eq!(scheduler.status().await.backoff_ms, 10_000);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_the_tick_in_flight() {
    let source = Arc::new(ScriptedTaskSource::new());
    source.set_open_tasks(vec![open("a")]).await;
    source.set_fetch_delay(Duration::from_secs(5)).await;
    let scheduler = scheduler_with(source.clone(), 60, 10);
    let mut events = scheduler.subscribe();

    scheduler.start(None).await;
    // Let the first tick reach the slow fetch.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(source.fetch_count(), 1);

    scheduler.shutdown().await;

    // The tick has already returned, cancelled before it could persist.
    let event = events.try_recv().expect("tick should have finished");
    assert!(!event.success);
    assert!(event.error.unwrap().to_lowercase().contains("cancel"));
    assert!(!scheduler.is_polling().await);

    // Starting again clears the cancellation.
    source.set_fetch_delay(Duration::ZERO).await;
    scheduler.start(None).await;
    assert!(events.recv().await.unwrap().success);
    scheduler.stop().await;
}
