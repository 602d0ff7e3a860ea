//! Rule management CLI commands.

use std::collections::BTreeSet;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::adapters::ticktick::parse_ticktick_date;
use crate::cli::context::AppContext;
use crate::cli::output::{list_table, output, render_list, truncate, CommandOutput};
use crate::domain::models::{DeadlineScope, EvalBreakdown, Rule, RuleMode, RuleScope, TagPriorityList, TaskContext};
use crate::domain::ports::RuleRepository;
use crate::services::{ClockZone, RuleEvaluator};

#[derive(Args, Debug)]
pub struct RulesArgs {
    #[command(subcommand)]
    pub command: RulesCommands,
}

#[derive(Subcommand, Debug)]
pub enum RulesCommands {
    /// List all rules
    List,
    /// Add a rule
    ///
    /// Scope kinds: tag, list, project, title_regex, weekday (0=Sun..6=Sat),
    /// time_range (HH:MM-HH:MM), deadline (has_deadline, overdue, within:<hours>).
    Add {
        /// exclusive, additive or multiplier
        mode: String,
        /// Scope kind
        kind: String,
        /// Scope value
        value: String,
        /// Points, or the factor for multipliers
        #[arg(allow_hyphen_values = true)]
        amount: f64,
        /// Lower wins exclusive ties
        #[arg(short, long, default_value = "0")]
        priority: i32,
        /// Create the rule disabled
        #[arg(long)]
        disabled: bool,
    },
    /// Change fields of an existing rule
    Update {
        id: i64,
        #[arg(long)]
        mode: Option<String>,
        /// New scope as `<kind>=<value>`
        #[arg(long)]
        scope: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        amount: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        priority: Option<i32>,
    },
    /// Delete a rule
    Delete { id: i64 },
    /// Enable a rule
    Enable { id: i64 },
    /// Disable a rule
    Disable { id: i64 },
    /// Show or replace the tag priority list (earlier tags win exclusive ties)
    TagPriority {
        /// New ordered list; omit to show the current one
        tags: Vec<String>,
        /// Clear the list
        #[arg(long, conflicts_with = "tags")]
        clear: bool,
    },
    /// Score a hypothetical completion against the current rules
    Test {
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        list: Option<String>,
        #[arg(long)]
        project: Option<String>,
        /// Due date (RFC 3339)
        #[arg(long)]
        due: Option<String>,
        /// Completion time (RFC 3339), defaults to now
        #[arg(long)]
        completed_at: Option<String>,
        /// Evaluate weekday and time-of-day scopes in UTC instead of local time
        #[arg(long)]
        utc: bool,
    },
}

/// Textual form of a scope value, the inverse of [`RuleScope::parse`].
pub fn scope_value(scope: &RuleScope) -> String {
    match scope {
        RuleScope::Tag(v) | RuleScope::List(v) | RuleScope::Project(v) | RuleScope::TitleRegex(v) => v.clone(),
        RuleScope::Weekday(day) => day.to_string(),
        RuleScope::TimeRange { start_minute, end_minute } => format!(
            "{:02}:{:02}-{:02}:{:02}",
            start_minute / 60,
            start_minute % 60,
            end_minute / 60,
            end_minute % 60
        ),
        RuleScope::Deadline(DeadlineScope::HasDeadline) => "has_deadline".to_string(),
        RuleScope::Deadline(DeadlineScope::Overdue) => "overdue".to_string(),
        RuleScope::Deadline(DeadlineScope::WithinHours(h)) => format!("within:{h}"),
    }
}

#[derive(Debug, Serialize)]
pub struct RuleOutput {
    pub id: i64,
    pub priority: i32,
    pub mode: String,
    pub kind: String,
    pub value: String,
    pub amount: f64,
    pub enabled: bool,
}

impl From<&Rule> for RuleOutput {
    fn from(rule: &Rule) -> Self {
        Self {
            id: rule.id,
            priority: rule.priority,
            mode: rule.mode.as_str().to_string(),
            kind: rule.scope.kind().to_string(),
            value: scope_value(&rule.scope),
            amount: rule.amount,
            enabled: rule.enabled,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RuleListOutput {
    pub rules: Vec<RuleOutput>,
    pub tag_priority: Vec<String>,
}

impl CommandOutput for RuleListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "prio", "mode", "scope", "value", "amount", "enabled"]);
        for rule in &self.rules {
            table.add_row(vec![
                rule.id.to_string(),
                rule.priority.to_string(),
                rule.mode.clone(),
                rule.kind.clone(),
                truncate(&rule.value, 30),
                rule.amount.to_string(),
                if rule.enabled { "yes" } else { "no" }.to_string(),
            ]);
        }
        let mut out = render_list("rule", &table, self.rules.len());
        if !self.tag_priority.is_empty() {
            out.push_str(&format!("\n\nTag priority: {}", self.tag_priority.join(" > ")));
        }
        out
    }
}

#[derive(Debug, Serialize)]
pub struct RuleActionOutput {
    pub success: bool,
    pub message: String,
    pub rule: Option<RuleOutput>,
}

impl CommandOutput for RuleActionOutput {
    fn to_human(&self) -> String {
        self.message.clone()
    }
}

#[derive(Debug, Serialize)]
pub struct TagPriorityOutput {
    pub tags: Vec<String>,
}

impl CommandOutput for TagPriorityOutput {
    fn to_human(&self) -> String {
        if self.tags.is_empty() {
            "Tag priority list is empty.".to_string()
        } else {
            format!("Tag priority: {}", self.tags.join(" > "))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DryRunOutput {
    pub task: TaskContext,
    pub breakdown: EvalBreakdown,
}

impl CommandOutput for DryRunOutput {
    fn to_human(&self) -> String {
        let b = &self.breakdown;
        let ids = |v: &[i64]| {
            if v.is_empty() {
                "-".to_string()
            } else {
                v.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
            }
        };
        [
            format!("Points: {}", b.points_pre_penalty),
            format!(
                "Exclusive: {}",
                b.exclusive_rule_id.map_or_else(|| "none".to_string(), |id| format!("rule {id}"))
            ),
            format!("Additive: {} (sum {})", ids(&b.additive_rule_ids), b.additive_sum),
            format!("Multipliers: {} (product {})", ids(&b.multiplier_rule_ids), b.multiplier_product),
        ]
        .join("\n")
    }
}

fn parse_mode(mode: &str) -> Result<RuleMode> {
    RuleMode::from_str(mode).ok_or_else(|| anyhow!("Invalid mode: {mode} (exclusive, additive, multiplier)"))
}

fn parse_amount(amount: f64) -> Result<f64> {
    if !amount.is_finite() {
        bail!("Amount must be a finite number");
    }
    Ok(amount)
}

fn parse_time(label: &str, value: &str) -> Result<DateTime<Utc>> {
    parse_ticktick_date(Some(value)).ok_or_else(|| anyhow!("Invalid {label} timestamp: {value}"))
}

async fn require_rule(repo: &dyn RuleRepository, id: i64) -> Result<Rule> {
    repo.get(id).await?.ok_or_else(|| anyhow!("Rule not found: {id}"))
}

async fn set_enabled(repo: &dyn RuleRepository, id: i64, enabled: bool, json_mode: bool) -> Result<()> {
    let mut rule = require_rule(repo, id).await?;
    rule.enabled = enabled;
    repo.update(&rule).await?;

    let out = RuleActionOutput {
        success: true,
        message: format!("Rule {} {}", id, if enabled { "enabled" } else { "disabled" }),
        rule: Some(RuleOutput::from(&rule)),
    };
    output(&out, json_mode);
    Ok(())
}

pub async fn execute(args: RulesArgs, ctx: AppContext, json_mode: bool) -> Result<()> {
    let repo = ctx.rules.clone();

    match args.command {
        RulesCommands::List => {
            let rules = repo.load_rules().await?;
            let out = RuleListOutput {
                rules: rules.iter().map(RuleOutput::from).collect(),
                tag_priority: repo.load_tag_priority().await?.0,
            };
            output(&out, json_mode);
        }

        RulesCommands::Add { mode, kind, value, amount, priority, disabled } => {
            let scope = RuleScope::parse(&kind, &value)?;
            let mut rule = Rule::new(0, parse_mode(&mode)?, scope, parse_amount(amount)?).with_priority(priority);
            if disabled {
                rule = rule.disabled();
            }
            rule.id = repo.insert(&rule).await?;

            let out = RuleActionOutput {
                success: true,
                message: format!("Rule created: {}", rule.id),
                rule: Some(RuleOutput::from(&rule)),
            };
            output(&out, json_mode);
        }

        RulesCommands::Update { id, mode, scope, amount, priority } => {
            let mut rule = require_rule(repo.as_ref(), id).await?;
            if let Some(mode) = mode {
                rule.mode = parse_mode(&mode)?;
            }
            if let Some(scope) = scope {
                let (kind, value) = scope
                    .split_once('=')
                    .context("Scope must be given as <kind>=<value>")?;
                rule.scope = RuleScope::parse(kind, value)?;
            }
            if let Some(amount) = amount {
                rule.amount = parse_amount(amount)?;
            }
            if let Some(priority) = priority {
                rule.priority = priority;
            }
            repo.update(&rule).await?;

            let out = RuleActionOutput {
                success: true,
                message: format!("Rule updated: {id}"),
                rule: Some(RuleOutput::from(&rule)),
            };
            output(&out, json_mode);
        }

        RulesCommands::Delete { id } => {
            repo.delete(id).await?;
            let out = RuleActionOutput {
                success: true,
                message: format!("Rule deleted: {id}"),
                rule: None,
            };
            output(&out, json_mode);
        }

        RulesCommands::Enable { id } => set_enabled(repo.as_ref(), id, true, json_mode).await?,

        RulesCommands::Disable { id } => set_enabled(repo.as_ref(), id, false, json_mode).await?,

        RulesCommands::TagPriority { tags, clear } => {
            if clear || !tags.is_empty() {
                let mut seen = BTreeSet::new();
                let list = TagPriorityList::new(tags.into_iter().filter(|t| seen.insert(t.clone())));
                repo.set_tag_priority(&list).await?;
            }
            let out = TagPriorityOutput {
                tags: repo.load_tag_priority().await?.0,
            };
            output(&out, json_mode);
        }

        RulesCommands::Test { title, tags, list, project, due, completed_at, utc } => {
            let completed_at = match completed_at {
                Some(s) => parse_time("completed-at", &s)?,
                None => Utc::now(),
            };
            let due_at = due.map(|s| parse_time("due", &s)).transpose()?;
            let task = TaskContext {
                id: "dry-run".to_string(),
                title,
                tags: tags.into_iter().collect(),
                list,
                project,
                completed_at,
                due_at,
            };

            let zone = if utc { ClockZone::utc() } else { ClockZone::Local };
            let rules = repo.load_rules().await?;
            let tag_priority = repo.load_tag_priority().await?;
            let breakdown = RuleEvaluator::with_zone(zone).evaluate(&task, &rules, &tag_priority)?;

            output(&DryRunOutput { task, breakdown }, json_mode);
        }
    }

    Ok(())
}
