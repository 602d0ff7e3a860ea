//! Reward-points ledger and the evaluation breakdown it records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::TaskContext;

/// Where the evaluator's base points came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseSource {
    Exclusive,
    None,
}

/// Full scoring breakdown for one completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalBreakdown {
    /// `round((base + additive_sum) * multiplier_product)`.
    pub points_pre_penalty: i64,
    pub base_source: BaseSource,
    /// Present iff `base_source == Exclusive`.
    pub exclusive_rule_id: Option<i64>,
    pub additive_rule_ids: Vec<i64>,
    pub multiplier_rule_ids: Vec<i64>,
    /// Raw sum before multipliers, unrounded.
    pub additive_sum: f64,
    /// Product of multipliers, 1.0 when none matched.
    pub multiplier_product: f64,
}

/// Kind of ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerSource {
    /// Award for a confirmed completion.
    Task,
    /// Reversal of an award whose completion was later contradicted.
    TaskRevoked,
}

impl LedgerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::TaskRevoked => "task_revoked",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "task" => Some(Self::Task),
            "task_revoked" => Some(Self::TaskRevoked),
            _ => None,
        }
    }
}

/// One append-only reward-points transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub amount: i64,
    pub source: LedgerSource,
    pub reason: String,
    pub related_task_id: Option<String>,
    pub metadata_json: String,
}

/// Metadata written with every task award so the ledger can explain itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskTransactionMeta {
    pub kind: String,
    pub version: u32,
    pub breakdown: EvalBreakdown,
    pub task: TaskContext,
    pub recurring: bool,
    /// Completion record this award pays for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_id: Option<Uuid>,
}

impl TaskTransactionMeta {
    pub const KIND: &'static str = "task_evaluated";
    pub const VERSION: u32 = 1;

    pub fn new(breakdown: EvalBreakdown, task: TaskContext, recurring: bool) -> Self {
        Self {
            kind: Self::KIND.to_string(),
            version: Self::VERSION,
            breakdown,
            task,
            recurring,
            completion_id: None,
        }
    }

    pub fn for_completion(mut self, completion_id: Uuid) -> Self {
        self.completion_id = Some(completion_id);
        self
    }
}

impl LedgerEntry {
    /// Award entry for a scored completion.
    pub fn award(meta: &TaskTransactionMeta, created_at: DateTime<Utc>) -> serde_json::Result<Self> {
        let reason = if meta.recurring {
            "TickTick completion (rollover)"
        } else {
            "TickTick completion"
        };
        Ok(Self {
            id: Uuid::new_v4(),
            created_at,
            amount: meta.breakdown.points_pre_penalty,
            source: LedgerSource::Task,
            reason: reason.to_string(),
            related_task_id: Some(meta.task.id.clone()),
            metadata_json: serde_json::to_string(meta)?,
        })
    }

    /// Compensating entry that cancels `awarded`.
    pub fn reversal(awarded: &Self, completion_id: Uuid, created_at: DateTime<Utc>) -> Self {
        let metadata = serde_json::json!({
            "kind": "task_revoked",
            "version": 1,
            "reversedEntryId": awarded.id,
            "completionId": completion_id,
        });
        Self {
            id: Uuid::new_v4(),
            created_at,
            amount: -awarded.amount,
            source: LedgerSource::TaskRevoked,
            reason: "Task reappeared as open".to_string(),
            related_task_id: awarded.related_task_id.clone(),
            metadata_json: metadata.to_string(),
        }
    }
}
