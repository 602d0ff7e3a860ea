//! Domain models for the reconciliation engine.

pub mod config;
pub mod ledger;
pub mod rule;
pub mod sync;
pub mod task;

pub use config::{Config, DatabaseConfig, LoggingConfig, SyncConfig, TickTickConfig};
pub use ledger::{BaseSource, EvalBreakdown, LedgerEntry, LedgerSource, TaskTransactionMeta};
pub use rule::{DeadlineScope, Rule, RuleMode, RuleScope, TagPriorityList};
pub use sync::{RecentCompletion, SyncStatus, SyncStatusEvent, TickPhase, TickReport};
pub use task::{
    CompletedTaskRecord, CompletionEvidence, OpenTaskRecord, RemovalReason, RemovedTaskRecord,
    TaskContext, TaskLookup,
};
