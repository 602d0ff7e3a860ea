//! Poll scheduler.
//!
//! Drives reconciliation ticks on an interval. After a failure the next
//! delay grows to `interval * min(2^failures, max_factor)` and drops back to
//! the plain interval after the next success. At most one tick is in flight:
//! manual runs and scheduled runs share one guard, and a request that finds
//! a tick running is coalesced into it.
//!
//! Stopping only cancels the pending timer. Ticks run on their own task, so
//! one already in flight is never cut short. Shutting down also cancels the
//! tick in flight and waits for it to return.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{RecentCompletion, SyncConfig, SyncStatus, SyncStatusEvent, TickReport};
use crate::services::reconciliation::ReconciliationOrchestrator;

/// Consecutive failures beyond this are not counted.
pub const MAX_TRACKED_FAILURES: u32 = 8;

/// Configuration for the poll scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay between ticks while healthy.
    pub poll_interval: Duration,
    /// Cap on the failure backoff multiplier.
    pub max_backoff_factor: u32,
    /// Number of recent completions kept for observers.
    pub recent_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(180),
            max_backoff_factor: 5,
            recent_capacity: 100,
        }
    }
}

impl From<&SyncConfig> for SchedulerConfig {
    fn from(sync: &SyncConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(sync.poll_interval_secs),
            max_backoff_factor: sync.max_backoff_factor,
            recent_capacity: sync.recent_buffer_size,
        }
    }
}

/// `min(2^failures, max_factor)`, never below 1.
pub fn backoff_factor(consecutive_failures: u32, max_factor: u32) -> u32 {
    2u32.saturating_pow(consecutive_failures).min(max_factor.max(1))
}

#[derive(Debug)]
struct SchedulerState {
    polling: bool,
    interval: Duration,
    consecutive_failures: u32,
    last_sync_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    next_run_at: Option<Instant>,
}

struct Shared {
    orchestrator: Arc<ReconciliationOrchestrator>,
    max_backoff_factor: u32,
    recent_capacity: usize,
    state: RwLock<SchedulerState>,
    tick_guard: Mutex<()>,
    recent: RwLock<VecDeque<RecentCompletion>>,
    events: broadcast::Sender<SyncStatusEvent>,
}

impl Shared {
    fn delay_for(&self, state: &SchedulerState) -> Duration {
        state.interval * backoff_factor(state.consecutive_failures, self.max_backoff_factor)
    }

    /// Run a tick unless one is already in flight. `Ok(None)` means coalesced.
    async fn run_tick(&self) -> DomainResult<Option<TickReport>> {
        let Ok(_guard) = self.tick_guard.try_lock() else {
            debug!("Tick already in flight, coalescing request");
            return Ok(None);
        };

        let result = self.orchestrator.run_tick().await;
        let now = Utc::now();

        let event = match &result {
            Ok(report) => {
                {
                    let mut state = self.state.write().await;
                    state.consecutive_failures = 0;
                    state.last_sync_at = Some(now);
                    state.last_error = None;
                }
                self.remember(&report.recent).await;
                SyncStatusEvent {
                    success: true,
                    completed_count: report.completed,
                    error: None,
                    timestamp: now,
                }
            }
            Err(e) => {
                let failures = {
                    let mut state = self.state.write().await;
                    state.consecutive_failures =
                        (state.consecutive_failures + 1).min(MAX_TRACKED_FAILURES);
                    state.last_error = Some(e.to_string());
                    state.consecutive_failures
                };
                warn!(error = %e, consecutive_failures = failures, "Sync tick failed");
                SyncStatusEvent {
                    success: false,
                    completed_count: 0,
                    error: Some(e.to_string()),
                    timestamp: now,
                }
            }
        };

        // No subscribers is fine.
        let _ = self.events.send(event);

        result.map(Some)
    }

    async fn remember(&self, completions: &[RecentCompletion]) {
        if completions.is_empty() {
            return;
        }
        let mut recent = self.recent.write().await;
        for completion in completions {
            recent.push_front(completion.clone());
        }
        recent.truncate(self.recent_capacity);
    }
}

/// Interval-driven tick runner with backoff and an in-flight guard.
pub struct PollScheduler {
    shared: Arc<Shared>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl PollScheduler {
    pub fn new(orchestrator: Arc<ReconciliationOrchestrator>, config: SchedulerConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        let shared = Shared {
            orchestrator,
            max_backoff_factor: config.max_backoff_factor,
            recent_capacity: config.recent_capacity,
            state: RwLock::new(SchedulerState {
                polling: false,
                interval: config.poll_interval,
                consecutive_failures: 0,
                last_sync_at: None,
                last_error: None,
                next_run_at: None,
            }),
            tick_guard: Mutex::new(()),
            recent: RwLock::new(VecDeque::new()),
            events,
        };
        Self {
            shared: Arc::new(shared),
            timer: Mutex::new(None),
        }
    }

    /// Receive a status event after every tick.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncStatusEvent> {
        self.shared.events.subscribe()
    }

    /// Run one tick now, then keep polling. Replaces any running timer.
    pub async fn start(&self, interval: Option<Duration>) {
        {
            let mut state = self.shared.state.write().await;
            if let Some(interval) = interval.filter(|i| !i.is_zero()) {
                state.interval = interval;
            }
            state.polling = true;
            info!(interval_secs = state.interval.as_secs(), "Starting sync polling");
        }
        self.shared.orchestrator.reset_cancellation();
        self.spawn_loop(true).await;
    }

    /// Cancel the pending timer. A tick in flight finishes on its own.
    pub async fn stop(&self) {
        if let Some(handle) = self.timer.lock().await.take() {
            handle.abort();
        }
        let mut state = self.shared.state.write().await;
        state.polling = false;
        state.next_run_at = None;
        info!("Stopped sync polling");
    }

    /// Stop polling, cancel the tick in flight, and wait until it returns.
    ///
    /// A cancelled tick stops at its next phase boundary and persists
    /// nothing. Later ticks stay cancelled until [`start`](Self::start).
    pub async fn shutdown(&self) {
        self.stop().await;
        self.shared.orchestrator.cancel();
        let _guard = self.shared.tick_guard.lock().await;
        info!("Sync shut down");
    }

    /// Change the interval; a running timer is rescheduled right away.
    pub async fn set_interval(&self, interval: Duration) {
        if interval.is_zero() {
            return;
        }
        let polling = {
            let mut state = self.shared.state.write().await;
            state.interval = interval;
            state.polling
        };
        if polling {
            self.spawn_loop(false).await;
        }
    }

    /// Run a tick outside the schedule. Returns `Ok(None)` when a tick was
    /// already in flight.
    pub async fn run_now(&self) -> DomainResult<Option<TickReport>> {
        self.shared.run_tick().await
    }

    pub async fn status(&self) -> SyncStatus {
        let state = self.shared.state.read().await;
        let backoff = self.shared.delay_for(&state);
        let next_run_in = state
            .next_run_at
            .map(|at| at.saturating_duration_since(Instant::now()));
        SyncStatus {
            last_sync_at: state.last_sync_at,
            error: state.last_error.clone(),
            polling: state.polling,
            poll_interval_secs: state.interval.as_secs(),
            backoff_ms: backoff.as_millis() as u64,
            next_run_in_ms: next_run_in.map(|d| d.as_millis() as u64),
            consecutive_failures: state.consecutive_failures,
        }
    }

    /// Recent confirmed completions, newest first.
    pub async fn recent(&self) -> Vec<RecentCompletion> {
        self.shared.recent.read().await.iter().cloned().collect()
    }

    pub async fn is_polling(&self) -> bool {
        self.shared.state.read().await.polling
    }

    async fn spawn_loop(&self, run_immediately: bool) {
        let mut timer = self.timer.lock().await;
        if let Some(handle) = timer.take() {
            handle.abort();
        }
        *timer = Some(tokio::spawn(poll_loop(self.shared.clone(), run_immediately)));
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        if let Ok(mut timer) = self.timer.try_lock() {
            if let Some(handle) = timer.take() {
                handle.abort();
            }
        }
    }
}

async fn poll_loop(shared: Arc<Shared>, run_immediately: bool) {
    if run_immediately {
        run_detached(&shared).await;
    }
    loop {
        let delay = {
            let mut state = shared.state.write().await;
            let delay = shared.delay_for(&state);
            state.next_run_at = Some(Instant::now() + delay);
            delay
        };
        debug!(delay_ms = delay.as_millis() as u64, "Next sync scheduled");
        tokio::time::sleep(delay).await;
        shared.state.write().await.next_run_at = None;
        run_detached(&shared).await;
    }
}

// The tick gets its own task so aborting the loop never interrupts it.
async fn run_detached(shared: &Arc<Shared>) {
    let shared = shared.clone();
    let tick = tokio::spawn(async move {
        if let Err(e) = shared.run_tick().await {
            debug!(error = %e, "Scheduled tick failed");
        }
    });
    let _ = tick.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{
        InMemoryReconciliationStore, InMemoryRuleRepository, ScriptedFailure, ScriptedTaskSource,
    };
    use crate::services::reconciliation::ReconcilerConfig;

    fn scheduler(source: Arc<ScriptedTaskSource>) -> PollScheduler {
        let orchestrator = ReconciliationOrchestrator::new(
            source,
            Arc::new(InMemoryReconciliationStore::new()),
            Arc::new(InMemoryRuleRepository::new()),
            ReconcilerConfig::default(),
        );
        PollScheduler::new(
            Arc::new(orchestrator),
            SchedulerConfig {
                poll_interval: Duration::from_secs(10),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_backoff_factor() {
        assert_eq!(backoff_factor(0, 5), 1);
        assert_eq!(backoff_factor(1, 5), 2);
        assert_eq!(backoff_factor(2, 5), 4);
        assert_eq!(backoff_factor(3, 5), 5);
        assert_eq!(backoff_factor(MAX_TRACKED_FAILURES, 5), 5);
        assert_eq!(backoff_factor(40, 5), 5);
        assert_eq!(backoff_factor(3, 0), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_grows_backoff_and_success_resets_it() {
        let source = Arc::new(ScriptedTaskSource::new());
        source.fail_fetch(Some(ScriptedFailure::Network)).await;
        let scheduler = scheduler(source.clone());

        scheduler.run_now().await.unwrap_err();
        let status = scheduler.status().await;
        assert_eq!(status.consecutive_failures, 1);
        assert_eq!(status.backoff_ms, 20_000);
        assert!(status.error.is_some());

        scheduler.run_now().await.unwrap_err();
        assert_eq!(scheduler.status().await.backoff_ms, 40_000);

        source.fail_fetch(None).await;
        scheduler.run_now().await.unwrap();
        let status = scheduler.status().await;
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.backoff_ms, 10_000);
        assert!(status.error.is_none());
        assert!(status.last_sync_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_capped() {
        let source = Arc::new(ScriptedTaskSource::new());
        source.fail_fetch(Some(ScriptedFailure::RateLimited)).await;
        let scheduler = scheduler(source);

        for _ in 0..12 {
            let _ = scheduler.run_now().await;
        }
        let status = scheduler.status().await;
        assert_eq!(status.consecutive_failures, MAX_TRACKED_FAILURES);
        assert_eq!(status.backoff_ms, 50_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_now_coalesces_with_in_flight_tick() {
        let source = Arc::new(ScriptedTaskSource::new());
        source.set_fetch_delay(Duration::from_secs(5)).await;
        let scheduler = Arc::new(scheduler(source.clone()));

        let first = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run_now().await })
        };
        tokio::task::yield_now().await;

        let second = scheduler.run_now().await.unwrap();
        assert!(second.is_none());

        let first = first.await.unwrap().unwrap();
        assert!(first.is_some());
        assert_eq!(source.fetch_count(), 1);
    }
}
