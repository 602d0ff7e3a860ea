//! Reward rule evaluation.
//!
//! Combines every matching rule into one point value for a completion:
//! at most one exclusive rule provides the base, additive rules are summed
//! on top, and multiplier rules scale the total. The result is rounded
//! once, half away from zero.
//!
//! The evaluator holds no state besides the clock zone, so the same
//! instance serves real completions and dry runs.

use std::cmp::Ordering;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    BaseSource, EvalBreakdown, Rule, RuleMode, TagPriorityList, TaskContext,
};
use crate::services::scope_matcher::{self, ClockZone, LocalClock};

/// Scores task completions against a rule set.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleEvaluator {
    zone: ClockZone,
}

impl RuleEvaluator {
    /// Evaluator using the host's local time zone.
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluator pinned to a specific zone.
    pub fn with_zone(zone: ClockZone) -> Self {
        Self { zone }
    }

    pub fn zone(&self) -> ClockZone {
        self.zone
    }

    /// Score one completion.
    ///
    /// Fails with [`DomainError::RuleEvaluation`] when a matching rule cannot
    /// be evaluated (bad regex, non-finite amount). Callers skip the reward
    /// for that task but keep its completion.
    pub fn evaluate(
        &self,
        ctx: &TaskContext,
        rules: &[Rule],
        tag_priority: &TagPriorityList,
    ) -> DomainResult<EvalBreakdown> {
        let clock = LocalClock::of(ctx.completed_at, self.zone);

        let mut exclusives: Vec<&Rule> = Vec::new();
        let mut additives: Vec<&Rule> = Vec::new();
        let mut multipliers: Vec<&Rule> = Vec::new();

        for rule in rules {
            if !scope_matcher::matches(rule, ctx, clock)? {
                continue;
            }
            if !rule.amount.is_finite() {
                return Err(DomainError::RuleEvaluation {
                    rule_id: rule.id,
                    reason: format!("amount {} is not a finite number", rule.amount),
                });
            }
            match rule.mode {
                RuleMode::Exclusive => exclusives.push(rule),
                RuleMode::Additive => additives.push(rule),
                RuleMode::Multiplier => multipliers.push(rule),
            }
        }

        let winner = exclusives
            .iter()
            .copied()
            .min_by(|a, b| compare_exclusive(a, b, tag_priority));

        let (base, base_source, exclusive_rule_id) = match winner {
            Some(rule) => (rule.amount, BaseSource::Exclusive, Some(rule.id)),
            None => (0.0, BaseSource::None, None),
        };

        let additive_sum: f64 = additives.iter().map(|r| r.amount).sum();
        let multiplier_product: f64 = multipliers.iter().map(|r| r.amount).product();

        let points_pre_penalty = round_points((base + additive_sum) * multiplier_product);

        Ok(EvalBreakdown {
            points_pre_penalty,
            base_source,
            exclusive_rule_id,
            additive_rule_ids: additives.iter().map(|r| r.id).collect(),
            multiplier_rule_ids: multipliers.iter().map(|r| r.id).collect(),
            additive_sum,
            multiplier_product,
        })
    }
}

/// Round half away from zero. Saturates at the `i64` bounds.
pub fn round_points(value: f64) -> i64 {
    value.round() as i64
}

// Tag-ranked rules first (earlier tag wins), then priority, then id.
fn compare_exclusive(a: &Rule, b: &Rule, tag_priority: &TagPriorityList) -> Ordering {
    tag_rank(a, tag_priority)
        .cmp(&tag_rank(b, tag_priority))
        .then(a.priority.cmp(&b.priority))
        .then(a.id.cmp(&b.id))
}

fn tag_rank(rule: &Rule, tag_priority: &TagPriorityList) -> (bool, usize) {
    match rule.scope.tag().and_then(|tag| tag_priority.rank(tag)) {
        Some(idx) => (false, idx),
        None => (true, 0),
    }
}
