//! TickTick Open API client with rate limiting.
//!
//! Implements [`TaskSource`] on top of the `/open/v1` REST endpoints. All
//! requests go through a token-bucket rate limiter and carry the bearer
//! token. Transport and auth failures become the remote error variants of
//! [`DomainError`], which abort the running tick.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{CompletionEvidence, OpenTaskRecord, TaskLookup, TickTickConfig};
use crate::domain::ports::TaskSource;

use super::models::{CompletedTasksResponse, ProjectData, TickTickProject, TickTickTask};

/// Environment variable consulted when the config carries no token.
pub const ACCESS_TOKEN_ENV: &str = "TICKTICK_ACCESS_TOKEN";

/// Token-bucket rate limiter.
///
/// Allows up to `capacity` requests per `window`. When the bucket is
/// exhausted, [`acquire`](RateLimiter::acquire) sleeps until the window
/// resets.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    tokens: u32,
    window: Duration,
    window_start: Instant,
}

impl RateLimiter {
    pub fn new(capacity: u32, window: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            tokens: capacity,
            window,
            window_start: Instant::now(),
        }
    }

    /// Acquire a single token, sleeping if necessary.
    pub async fn acquire(&mut self) {
        let elapsed = self.window_start.elapsed();
        if elapsed >= self.window {
            self.tokens = self.capacity;
            self.window_start = Instant::now();
        }

        if self.tokens > 0 {
            self.tokens -= 1;
        } else {
            let remaining = self.window.saturating_sub(elapsed);
            warn!(
                sleep_ms = remaining.as_millis() as u64,
                "TickTick rate limit reached, sleeping"
            );
            tokio::time::sleep(remaining).await;
            self.tokens = self.capacity - 1;
            self.window_start = Instant::now();
        }
    }
}

/// HTTP client for the TickTick Open API.
#[derive(Debug, Clone)]
pub struct TickTickClient {
    http: Client,
    api_base: String,
    access_token: Option<String>,
    timeout: Duration,
    requests_per_window: u32,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl TickTickClient {
    /// Create a client against `api_base` (no trailing slash needed).
    pub fn new(
        api_base: impl Into<String>,
        access_token: Option<String>,
        requests_per_minute: u32,
        timeout: Duration,
    ) -> DomainResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::ValidationFailed(format!("cannot build HTTP client: {e}")))?;
        let api_base = api_base.into().trim_end_matches('/').to_string();

        Ok(Self {
            http,
            api_base,
            access_token: access_token.filter(|t| !t.trim().is_empty()),
            timeout,
            requests_per_window: requests_per_minute,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(
                requests_per_minute,
                Duration::from_secs(60),
            ))),
        })
    }

    /// Replace the one-minute rate-limit window, keeping the request budget.
    pub fn with_rate_window(mut self, window: Duration) -> Self {
        let capacity = self.requests_per_window;
        self.rate_limiter = Arc::new(Mutex::new(RateLimiter::new(capacity, window)));
        self
    }

    /// Build from configuration, falling back to `TICKTICK_ACCESS_TOKEN`.
    pub fn from_config(config: &TickTickConfig, timeout: Duration) -> DomainResult<Self> {
        let token = config
            .access_token
            .clone()
            .or_else(|| std::env::var(ACCESS_TOKEN_ENV).ok());
        Self::new(&config.api_base, token, config.requests_per_minute, timeout)
    }

    pub fn has_token(&self) -> bool {
        self.access_token.is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// Acquire a rate-limit token and send an authorized GET.
    ///
    /// Only the send is bounded by the request timeout; waiting for a token
    /// is not.
    async fn get(&self, path: &str) -> DomainResult<Response> {
        let token = self
            .access_token
            .as_deref()
            .ok_or_else(|| DomainError::AuthExpired(format!("no access token; set {ACCESS_TOKEN_ENV}")))?;

        self.rate_limiter.lock().await.acquire().await;
        let url = self.url(path);
        debug!(%url, "TickTick request");

        self.http
            .get(&url)
            .bearer_auth(token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| self.transport_error(&e))
    }

    fn transport_error(&self, err: &reqwest::Error) -> DomainError {
        if err.is_timeout() {
            DomainError::Timeout(self.timeout.as_secs())
        } else {
            DomainError::Network(err.to_string())
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(&self, resp: Response, what: &str) -> DomainResult<T> {
        resp.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                DomainError::Timeout(self.timeout.as_secs())
            } else {
                DomainError::SerializationError(format!("TickTick {what} parse failed: {e}"))
            }
        })
    }

    /// GET a path that must succeed; every non-2xx status is an error.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str, what: &str) -> DomainResult<T> {
        let resp = self.get(path).await?;
        let status = resp.status();
        if let Some(err) = remote_failure(status) {
            return Err(err);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DomainError::Network(format!(
                "TickTick {what} returned {status}: {}",
                truncate(&body, 300)
            )));
        }
        self.read_json(resp, what).await
    }

    pub async fn list_projects(&self) -> DomainResult<Vec<TickTickProject>> {
        self.get_json("/project", "projects").await
    }

    pub async fn project_data(&self, project_id: &str) -> DomainResult<ProjectData> {
        self.get_json(&format!("/project/{project_id}/data"), "project data")
            .await
    }

    /// Completed tasks of one project. `None` when the project has no
    /// completion history endpoint (non-2xx, non-fatal status).
    async fn project_completed(&self, project_id: &str) -> DomainResult<Option<Vec<TickTickTask>>> {
        let resp = self.get(&format!("/project/{project_id}/completed")).await?;
        let status = resp.status();
        if let Some(err) = remote_failure(status) {
            return Err(err);
        }
        if !status.is_success() {
            debug!(project_id, %status, "No completion history for project");
            return Ok(None);
        }
        let body: CompletedTasksResponse = self.read_json(resp, "completed tasks").await?;
        Ok(Some(body.tasks))
    }
}

/// Statuses that mean the remote as a whole is unusable right now.
fn remote_failure(status: StatusCode) -> Option<DomainError> {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Some(DomainError::AuthExpired(format!("TickTick returned {status}")))
        }
        StatusCode::TOO_MANY_REQUESTS => Some(DomainError::RateLimited(format!("TickTick returned {status}"))),
        _ => None,
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl TaskSource for TickTickClient {
    async fn fetch_open_tasks(&self) -> DomainResult<Vec<OpenTaskRecord>> {
        let seen_at = Utc::now();
        let projects = self.list_projects().await?;
        let mut records = Vec::new();

        for project in &projects {
            let data = self.project_data(&project.id).await?;
            records.extend(
                data.tasks
                    .into_iter()
                    .filter(|t| !t.is_completed() && !t.is_deleted())
                    .map(|t| t.into_open_record(project, seen_at)),
            );
        }

        debug!(projects = projects.len(), open = records.len(), "Fetched open tasks");
        Ok(records)
    }

    async fn fetch_task(&self, project_id: &str, task_id: &str) -> DomainResult<TaskLookup> {
        let resp = self.get(&format!("/project/{project_id}/task/{task_id}")).await?;
        let status = resp.status();
        if let Some(err) = remote_failure(status) {
            return Err(err);
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(TaskLookup::NotFound);
        }
        if !status.is_success() {
            return Ok(TaskLookup::OtherError(format!("status {status}")));
        }

        // Some deployments answer 200 with an empty body for unknown ids.
        let body = resp.text().await.map_err(|e| self.transport_error(&e))?;
        if body.trim().is_empty() {
            return Ok(TaskLookup::NotFound);
        }
        match serde_json::from_str::<TickTickTask>(&body) {
            Ok(task) if task.is_deleted() => Ok(TaskLookup::NotFound),
            Ok(task) => Ok(task.to_lookup()),
            Err(e) => Ok(TaskLookup::OtherError(format!("unreadable task payload: {e}"))),
        }
    }

    async fn fetch_completions_since(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<CompletionEvidence>> {
        let projects = self.list_projects().await?;
        let mut evidence = Vec::new();

        for project in &projects {
            let Some(tasks) = self.project_completed(&project.id).await? else {
                continue;
            };
            evidence.extend(
                tasks
                    .iter()
                    .filter(|t| !t.is_deleted())
                    .filter_map(TickTickTask::to_evidence)
                    .filter(|e| e.completed_at > from && e.completed_at <= to),
            );
        }

        evidence.sort_by(|a, b| a.completed_at.cmp(&b.completed_at).then_with(|| a.task_id.cmp(&b.task_id)));
        let mut seen = HashSet::new();
        evidence.retain(|e| seen.insert(e.task_id.clone()));
        Ok(evidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(token: Option<&str>) -> TickTickClient {
        TickTickClient::new(
            "http://localhost:1/open/v1/",
            token.map(String::from),
            100,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_rate_limiter_creation() {
        let rl = RateLimiter::new(100, Duration::from_secs(60));
        assert_eq!(rl.capacity, 100);
        assert_eq!(rl.tokens, 100);
    }

    #[test]
    fn test_rate_limiter_zero_capacity_clamped() {
        let rl = RateLimiter::new(0, Duration::from_secs(60));
        assert_eq!(rl.capacity, 1);
    }

    #[tokio::test]
    async fn test_rate_limiter_acquire_decrements_tokens() {
        let mut rl = RateLimiter::new(5, Duration::from_secs(60));
        rl.acquire().await;
        assert_eq!(rl.tokens, 4);
        rl.acquire().await;
        assert_eq!(rl.tokens, 3);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        assert_eq!(client(Some("t")).url("/project"), "http://localhost:1/open/v1/project");
    }

    #[test]
    fn test_blank_token_treated_as_missing() {
        assert!(!client(Some("  ")).has_token());
        assert!(client(Some("abc")).has_token());
    }

    #[tokio::test]
    async fn test_missing_token_is_auth_expired() {
        let err = client(None).fetch_open_tasks().await.unwrap_err();
        assert!(matches!(err, DomainError::AuthExpired(_)));
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(remote_failure(StatusCode::UNAUTHORIZED), Some(DomainError::AuthExpired(_))));
        assert!(matches!(remote_failure(StatusCode::FORBIDDEN), Some(DomainError::AuthExpired(_))));
        assert!(matches!(remote_failure(StatusCode::TOO_MANY_REQUESTS), Some(DomainError::RateLimited(_))));
        assert!(remote_failure(StatusCode::INTERNAL_SERVER_ERROR).is_none());
        assert!(remote_failure(StatusCode::NOT_FOUND).is_none());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
