//! Port trait definitions (Hexagonal Architecture)
//!
//! - TaskSource: the remote task service the engine reconciles against
//! - ReconciliationStore: open snapshot, completion/removal records, ledger, cursor
//! - RuleRepository: reward rules and tag priority

pub mod reconciliation_store;
pub mod rule_repository;
pub mod task_source;

pub use reconciliation_store::{ReconciliationStore, Revocation, TickCommit};
pub use rule_repository::RuleRepository;
pub use task_source::TaskSource;
