//! Scope matching: does a rule apply to a completion?
//!
//! Weekday and time-of-day scopes are judged in the user's local time, so
//! the completion instant is projected once into a [`LocalClock`] before any
//! rule is checked.

use chrono::{DateTime, Datelike, FixedOffset, Local, Offset, Timelike, Utc};
use regex::RegexBuilder;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{DeadlineScope, Rule, RuleScope, TaskContext};

/// Which zone "local time" means for weekday/time-range scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockZone {
    /// The host's local zone.
    #[default]
    Local,
    /// A fixed UTC offset.
    Fixed(FixedOffset),
}

impl ClockZone {
    pub fn utc() -> Self {
        Self::Fixed(Utc.fix())
    }
}

/// Completion time as seen on the user's wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalClock {
    /// 0 = Sunday .. 6 = Saturday.
    pub weekday: u8,
    pub minute_of_day: u16,
}

impl LocalClock {
    pub fn of(at: DateTime<Utc>, zone: ClockZone) -> Self {
        match zone {
            ClockZone::Local => Self::from_parts(&at.with_timezone(&Local)),
            ClockZone::Fixed(offset) => Self::from_parts(&at.with_timezone(&offset)),
        }
    }

    fn from_parts<T: Datelike + Timelike>(t: &T) -> Self {
        Self {
            weekday: t.weekday().num_days_from_sunday() as u8,
            minute_of_day: (t.hour() * 60 + t.minute()) as u16,
        }
    }
}

/// Whether `rule` applies to the completion described by `ctx`.
///
/// Disabled rules never match. Errors only for payloads that cannot be
/// evaluated at all, such as an unparsable title regex.
pub fn matches(rule: &Rule, ctx: &TaskContext, clock: LocalClock) -> DomainResult<bool> {
    if !rule.enabled {
        return Ok(false);
    }

    let matched = match &rule.scope {
        RuleScope::Tag(tag) => ctx.tags.contains(tag),
        RuleScope::List(list) => ctx.list.as_deref() == Some(list.as_str()),
        RuleScope::Project(project) => ctx.project.as_deref() == Some(project.as_str()),
        RuleScope::TitleRegex(pattern) => RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| DomainError::RuleEvaluation {
                rule_id: rule.id,
                reason: format!("invalid title regex: {e}"),
            })?
            .is_match(&ctx.title),
        RuleScope::Weekday(day) => clock.weekday == *day,
        RuleScope::TimeRange { start_minute, end_minute } => {
            in_time_range(clock.minute_of_day, *start_minute, *end_minute)
        }
        RuleScope::Deadline(deadline) => matches_deadline(*deadline, ctx),
    };

    Ok(matched)
}

/// Inclusive range check; `start > end` wraps past midnight.
pub fn in_time_range(minute: u16, start: u16, end: u16) -> bool {
    if start <= end {
        minute >= start && minute <= end
    } else {
        minute >= start || minute <= end
    }
}

fn matches_deadline(deadline: DeadlineScope, ctx: &TaskContext) -> bool {
    let Some(due_at) = ctx.due_at else {
        return false;
    };

    match deadline {
        DeadlineScope::HasDeadline => true,
        DeadlineScope::Overdue => due_at < ctx.completed_at,
        DeadlineScope::WithinHours(hours) => {
            if !hours.is_finite() {
                return false;
            }
            let diff_ms = (due_at - ctx.completed_at).num_milliseconds().unsigned_abs() as f64;
            diff_ms <= hours.abs() * 3_600_000.0
        }
    }
}
