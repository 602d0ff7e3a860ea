//! tickrewards - point rewards for completed TickTick tasks
//!
//! The remote task service only reports which tasks are currently open.
//! Completions are inferred by diffing successive open-task snapshots,
//! confirming each disappearance against the remote before any points are
//! awarded, and scoring confirmed completions with user-defined rules.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and port traits
//! - **Service Layer** (`services`): rule evaluation and the reconciliation pipeline
//! - **Adapters** (`adapters`): SQLite persistence, the TickTick client, in-memory doubles
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{Config, Rule, RuleMode, RuleScope, TaskContext};
pub use domain::ports::{ReconciliationStore, RuleRepository, TaskSource};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{PollScheduler, ReconciliationOrchestrator, RuleEvaluator};
