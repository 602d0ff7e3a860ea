//! Common test utilities for integration tests
//!
//! Builds an orchestrator over a migrated in-memory SQLite database and a
//! scripted task source, plus small record and rule fixtures.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use tickrewards::adapters::memory::ScriptedTaskSource;
use tickrewards::adapters::sqlite::{create_migrated_test_pool, SqliteReconciliationStore, SqliteRuleRepository};
use tickrewards::domain::models::{OpenTaskRecord, Rule, RuleMode, RuleScope};
use tickrewards::domain::ports::RuleRepository;
use tickrewards::services::{ClockZone, ReconcilerConfig, ReconciliationOrchestrator, RuleEvaluator};

/// Everything a reconciliation scenario needs.
pub struct Harness {
    pub pool: SqlitePool,
    pub source: Arc<ScriptedTaskSource>,
    pub store: Arc<SqliteReconciliationStore>,
    pub rules: Arc<SqliteRuleRepository>,
    pub orchestrator: Arc<ReconciliationOrchestrator>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(ReconcilerConfig::default()).await
    }

    pub async fn with_config(config: ReconcilerConfig) -> Self {
        let pool = create_migrated_test_pool()
            .await
            .expect("failed to create test database");
        let source = Arc::new(ScriptedTaskSource::new());
        let store = Arc::new(SqliteReconciliationStore::new(pool.clone()));
        let rules = Arc::new(SqliteRuleRepository::new(pool.clone()));
        let orchestrator = Arc::new(
            ReconciliationOrchestrator::new(source.clone(), store.clone(), rules.clone(), config)
                .with_evaluator(RuleEvaluator::with_zone(ClockZone::utc())),
        );
        Self {
            pool,
            source,
            store,
            rules,
            orchestrator,
        }
    }

    pub async fn add_rule(&self, mode: RuleMode, scope: RuleScope, amount: f64) -> i64 {
        self.rules
            .insert(&Rule::new(0, mode, scope, amount))
            .await
            .expect("failed to insert rule")
    }
}

/// An open task in project `P` with the given id.
pub fn open_task(id: &str, title: &str) -> OpenTaskRecord {
    OpenTaskRecord::new(id, title, Utc::now()).with_project("P")
}

pub fn hours_from_now(hours: i64) -> DateTime<Utc> {
    Utc::now() + Duration::hours(hours)
}

/// Setup test logging
///
/// Initializes a tracing subscriber that writes through the test harness.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
