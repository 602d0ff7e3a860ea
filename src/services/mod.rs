//! Core services: rule evaluation and the reconciliation pipeline.

pub mod disappearance_classifier;
pub mod poll_scheduler;
pub mod reconciliation;
pub mod rule_evaluator;
pub mod scope_matcher;
pub mod snapshot_differ;

pub use disappearance_classifier::{
    Classification, ClassifierConfig, ConfirmedCompletion, DisappearanceClassifier,
};
pub use poll_scheduler::{backoff_factor, PollScheduler, SchedulerConfig, MAX_TRACKED_FAILURES};
pub use reconciliation::{next_cursor, ReconcilerConfig, ReconciliationOrchestrator};
pub use rule_evaluator::{round_points, RuleEvaluator};
pub use scope_matcher::{ClockZone, LocalClock};
pub use snapshot_differ::{DiffResult, Rollover, SnapshotDiffer};
