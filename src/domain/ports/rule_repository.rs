//! Repository port for reward rules and the tag priority list.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Rule, TagPriorityList};

#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// All decodable rules, ordered by priority then id.
    async fn load_rules(&self) -> DomainResult<Vec<Rule>>;

    async fn get(&self, id: i64) -> DomainResult<Option<Rule>>;

    /// Insert a new rule; `rule.id` is ignored. Returns the assigned id.
    async fn insert(&self, rule: &Rule) -> DomainResult<i64>;

    async fn update(&self, rule: &Rule) -> DomainResult<()>;

    async fn delete(&self, id: i64) -> DomainResult<()>;

    async fn load_tag_priority(&self) -> DomainResult<TagPriorityList>;

    async fn set_tag_priority(&self, tags: &TagPriorityList) -> DomainResult<()>;
}
