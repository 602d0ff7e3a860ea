//! SQLite implementation of the RuleRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::warn;

use crate::adapters::sqlite::format_datetime;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Rule, RuleMode, RuleScope, TagPriorityList};
use crate::domain::ports::RuleRepository;

const TAG_PRIORITY_KEY: &str = "tag_priority";

#[derive(Clone)]
pub struct SqliteRuleRepository {
    pool: SqlitePool,
}

impl SqliteRuleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RuleRow {
    id: i64,
    priority: i64,
    mode: String,
    scope_json: String,
    amount: f64,
    enabled: i32,
}

fn row_to_rule(row: RuleRow) -> DomainResult<Rule> {
    let mode = RuleMode::from_str(&row.mode).ok_or_else(|| DomainError::RuleEvaluation {
        rule_id: row.id,
        reason: format!("unknown mode '{}'", row.mode),
    })?;
    let scope: RuleScope =
        serde_json::from_str(&row.scope_json).map_err(|e| DomainError::RuleEvaluation {
            rule_id: row.id,
            reason: format!("malformed scope: {e}"),
        })?;

    Ok(Rule {
        id: row.id,
        priority: row.priority as i32,
        mode,
        scope,
        amount: row.amount,
        enabled: row.enabled != 0,
    })
}

#[async_trait]
impl RuleRepository for SqliteRuleRepository {
    async fn load_rules(&self) -> DomainResult<Vec<Rule>> {
        let rows: Vec<RuleRow> = sqlx::query_as("SELECT * FROM rules ORDER BY priority, id")
            .fetch_all(&self.pool)
            .await?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            match row_to_rule(row) {
                Ok(rule) => rules.push(rule),
                Err(e) => warn!(error = %e, "Skipping unreadable rule"),
            }
        }
        Ok(rules)
    }

    async fn get(&self, id: i64) -> DomainResult<Option<Rule>> {
        let row: Option<RuleRow> = sqlx::query_as("SELECT * FROM rules WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_rule).transpose()
    }

    async fn insert(&self, rule: &Rule) -> DomainResult<i64> {
        let now = format_datetime(&Utc::now());
        let result = sqlx::query(
            r#"INSERT INTO rules (priority, mode, scope_json, amount, enabled, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(rule.priority)
        .bind(rule.mode.as_str())
        .bind(serde_json::to_string(&rule.scope)?)
        .bind(rule.amount)
        .bind(i32::from(rule.enabled))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn update(&self, rule: &Rule) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE rules
               SET priority = ?, mode = ?, scope_json = ?, amount = ?, enabled = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(rule.priority)
        .bind(rule.mode.as_str())
        .bind(serde_json::to_string(&rule.scope)?)
        .bind(rule.amount)
        .bind(i32::from(rule.enabled))
        .bind(format_datetime(&Utc::now()))
        .bind(rule.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::RuleNotFound(rule.id));
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> DomainResult<()> {
        let result = sqlx::query("DELETE FROM rules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::RuleNotFound(id));
        }
        Ok(())
    }

    async fn load_tag_priority(&self) -> DomainResult<TagPriorityList> {
        let value: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(TAG_PRIORITY_KEY)
            .fetch_optional(&self.pool)
            .await?;

        match value {
            Some((json,)) => match serde_json::from_str(&json) {
                Ok(list) => Ok(list),
                Err(e) => {
                    warn!(error = %e, "Ignoring malformed tag priority setting");
                    Ok(TagPriorityList::default())
                }
            },
            None => Ok(TagPriorityList::default()),
        }
    }

    async fn set_tag_priority(&self, tags: &TagPriorityList) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(TAG_PRIORITY_KEY)
        .bind(serde_json::to_string(tags)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
