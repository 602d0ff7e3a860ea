//! Reward rule domain model.
//!
//! A rule pairs a scope (which completions it applies to) with a mode
//! (how its amount combines with other matching rules).

use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};

/// Minutes in a day; time-range bounds are `0..MINUTES_PER_DAY`.
pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// How a matching rule contributes to the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleMode {
    /// At most one exclusive rule wins and supplies the base.
    Exclusive,
    /// Summed on top of the base.
    Additive,
    /// Multiplied onto (base + additive sum).
    Multiplier,
}

impl RuleMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exclusive => "exclusive",
            Self::Additive => "additive",
            Self::Multiplier => "multiplier",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "exclusive" => Some(Self::Exclusive),
            "additive" => Some(Self::Additive),
            "multiplier" => Some(Self::Multiplier),
            _ => None,
        }
    }
}

/// Deadline-relative scopes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineScope {
    HasDeadline,
    /// Due date strictly before the completion time.
    Overdue,
    /// Completed within N hours of the due date, early or late.
    WithinHours(f64),
}

/// What a rule applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RuleScope {
    Tag(String),
    List(String),
    Project(String),
    /// Case-insensitive regex searched in the title.
    TitleRegex(String),
    /// 0 = Sunday .. 6 = Saturday, in local time.
    Weekday(u8),
    /// Inclusive minute-of-day range; wraps midnight when start > end.
    TimeRange { start_minute: u16, end_minute: u16 },
    Deadline(DeadlineScope),
}

impl RuleScope {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tag(_) => "tag",
            Self::List(_) => "list",
            Self::Project(_) => "project",
            Self::TitleRegex(_) => "title_regex",
            Self::Weekday(_) => "weekday",
            Self::TimeRange { .. } => "time_range",
            Self::Deadline(_) => "deadline",
        }
    }

    /// The tag this scope targets, if it is tag-scoped.
    pub fn tag(&self) -> Option<&str> {
        match self {
            Self::Tag(tag) => Some(tag),
            _ => None,
        }
    }

    /// Parse a scope from a kind name and a textual value.
    ///
    /// Accepted values: `weekday` 0-6, `time_range` as `HH:MM-HH:MM`,
    /// `deadline` as `has_deadline`, `overdue` or `within:<hours>`.
    pub fn parse(kind: &str, value: &str) -> DomainResult<Self> {
        let scope = match kind {
            "tag" => Self::Tag(value.to_string()),
            "list" => Self::List(value.to_string()),
            "project" => Self::Project(value.to_string()),
            "title_regex" => Self::TitleRegex(value.to_string()),
            "weekday" => Self::Weekday(value.trim().parse().map_err(|_| {
                DomainError::ValidationFailed(format!("weekday must be 0-6, got '{value}'"))
            })?),
            "time_range" => {
                let (start, end) = value.split_once('-').ok_or_else(|| {
                    DomainError::ValidationFailed(format!("time_range must be HH:MM-HH:MM, got '{value}'"))
                })?;
                Self::TimeRange {
                    start_minute: parse_hhmm(start)?,
                    end_minute: parse_hhmm(end)?,
                }
            }
            "deadline" => Self::Deadline(match value.trim() {
                "has_deadline" => DeadlineScope::HasDeadline,
                "overdue" => DeadlineScope::Overdue,
                other => {
                    let hours = other
                        .strip_prefix("within:")
                        .and_then(|h| h.parse::<f64>().ok())
                        .ok_or_else(|| {
                            DomainError::ValidationFailed(format!(
                                "deadline must be has_deadline, overdue or within:<hours>, got '{other}'"
                            ))
                        })?;
                    DeadlineScope::WithinHours(hours)
                }
            }),
            other => {
                return Err(DomainError::ValidationFailed(format!("Unknown scope kind: {other}")));
            }
        };
        scope.validate()?;
        Ok(scope)
    }

    /// Check the payload is well formed. The regex itself is compiled here
    /// so bad patterns are rejected at write time.
    pub fn validate(&self) -> DomainResult<()> {
        match self {
            Self::Tag(v) | Self::List(v) | Self::Project(v) if v.is_empty() => Err(
                DomainError::ValidationFailed(format!("{} scope value cannot be empty", self.kind())),
            ),
            Self::TitleRegex(pattern) => regex::RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map(|_| ())
                .map_err(|e| DomainError::ValidationFailed(format!("invalid title regex: {e}"))),
            Self::Weekday(day) if *day > 6 => Err(DomainError::ValidationFailed(format!(
                "weekday must be 0-6, got {day}"
            ))),
            Self::TimeRange { start_minute, end_minute }
                if *start_minute >= MINUTES_PER_DAY || *end_minute >= MINUTES_PER_DAY =>
            {
                Err(DomainError::ValidationFailed(format!(
                    "time range minutes must be below {MINUTES_PER_DAY}, got {start_minute}-{end_minute}"
                )))
            }
            Self::Deadline(DeadlineScope::WithinHours(hours)) if !hours.is_finite() || *hours < 0.0 => {
                Err(DomainError::ValidationFailed(format!(
                    "within hours must be a non-negative number, got {hours}"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Parse `HH:MM` (24h) into a minute of day.
pub fn parse_hhmm(s: &str) -> DomainResult<u16> {
    let invalid = || DomainError::ValidationFailed(format!("expected HH:MM, got '{s}'"));
    let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
    let h: u16 = h.parse().map_err(|_| invalid())?;
    let m: u16 = m.parse().map_err(|_| invalid())?;
    if h > 23 || m > 59 {
        return Err(invalid());
    }
    Ok(h * 60 + m)
}

/// A reward rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    /// Lower value wins exclusive ties.
    pub priority: i32,
    pub mode: RuleMode,
    pub scope: RuleScope,
    /// Points for exclusive/additive rules; factor for multipliers.
    pub amount: f64,
    pub enabled: bool,
}

impl Rule {
    pub fn new(id: i64, mode: RuleMode, scope: RuleScope, amount: f64) -> Self {
        Self {
            id,
            priority: 0,
            mode,
            scope,
            amount,
            enabled: true,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Ordered tags; earlier entries take precedence between exclusive rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagPriorityList(pub Vec<String>);

impl TagPriorityList {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(tags.into_iter().map(Into::into).collect())
    }

    /// Position of `tag` in the list, if present.
    pub fn rank(&self, tag: &str) -> Option<usize> {
        self.0.iter().position(|t| t == tag)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_json_shape() {
        let scope = RuleScope::TimeRange { start_minute: 1320, end_minute: 360 };
        let json = serde_json::to_value(&scope).unwrap();
        assert_eq!(json["kind"], "time_range");
        assert_eq!(json["value"]["start_minute"], 1320);

        let deadline: RuleScope =
            serde_json::from_str(r#"{"kind":"deadline","value":{"within_hours":3.0}}"#).unwrap();
        assert_eq!(deadline, RuleScope::Deadline(DeadlineScope::WithinHours(3.0)));

        let has: RuleScope = serde_json::from_str(r#"{"kind":"deadline","value":"has_deadline"}"#).unwrap();
        assert_eq!(has, RuleScope::Deadline(DeadlineScope::HasDeadline));
    }

    #[test]
    fn test_parse_scopes() {
        assert_eq!(
            RuleScope::parse("time_range", "22:00-06:00").unwrap(),
            RuleScope::TimeRange { start_minute: 1320, end_minute: 360 }
        );
        assert_eq!(
            RuleScope::parse("deadline", "within:3").unwrap(),
            RuleScope::Deadline(DeadlineScope::WithinHours(3.0))
        );
        assert_eq!(RuleScope::parse("weekday", "0").unwrap(), RuleScope::Weekday(0));
        assert!(RuleScope::parse("weekday", "7").is_err());
        assert!(RuleScope::parse("title_regex", "(unclosed").is_err());
        assert!(RuleScope::parse("colour", "red").is_err());
        assert!(RuleScope::parse("tag", "").is_err());
    }

    #[test]
    fn test_parse_hhmm_bounds() {
        assert_eq!(parse_hhmm("00:00").unwrap(), 0);
        assert_eq!(parse_hhmm("23:59").unwrap(), 1439);
        assert!(parse_hhmm("24:00").is_err());
        assert!(parse_hhmm("noon").is_err());
    }

    #[test]
    fn test_tag_priority_rank() {
        let list = TagPriorityList::new(["urgent", "important"]);
        assert_eq!(list.rank("urgent"), Some(0));
        assert_eq!(list.rank("important"), Some(1));
        assert_eq!(list.rank("someday"), None);
    }

    #[test]
    fn test_mode_round_trip() {
        for mode in [RuleMode::Exclusive, RuleMode::Additive, RuleMode::Multiplier] {
            assert_eq!(RuleMode::from_str(mode.as_str()), Some(mode));
        }
    }
}
