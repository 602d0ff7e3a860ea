//! Sync CLI commands.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use serde::Serialize;
use tracing::info;

use crate::cli::context::AppContext;
use crate::cli::output::{list_table, output, render_list, truncate, CommandOutput};
use crate::domain::models::{RecentCompletion, TickReport};
use crate::domain::ports::ReconciliationStore;

#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(subcommand)]
    pub command: SyncCommands,
}

#[derive(Subcommand, Debug)]
pub enum SyncCommands {
    /// Run a single reconciliation tick
    Once,
    /// Poll until interrupted (Ctrl-C)
    Start {
        /// Override the configured poll interval, in seconds
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Show stored sync state
    Status {
        /// Number of recent completions to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[derive(Debug, Serialize)]
pub struct TickOutput {
    pub completed: usize,
    pub rollovers: usize,
    pub quarantined: usize,
    pub unscored: usize,
    pub revoked: usize,
    pub points_awarded: i64,
    pub open_tasks: usize,
    pub next_cursor: Option<DateTime<Utc>>,
    pub recent: Vec<RecentCompletion>,
}

impl From<TickReport> for TickOutput {
    fn from(report: TickReport) -> Self {
        Self {
            completed: report.completed,
            rollovers: report.rollovers,
            quarantined: report.quarantined,
            unscored: report.unscored,
            revoked: report.revoked,
            points_awarded: report.points_awarded,
            open_tasks: report.open_tasks,
            next_cursor: report.next_cursor,
            recent: report.recent,
        }
    }
}

impl CommandOutput for TickOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Tick committed: {} completed ({} rollovers), {} quarantined, {} revoked, {:+} points. {} open tasks.",
            self.completed, self.rollovers, self.quarantined, self.revoked, self.points_awarded, self.open_tasks
        )];
        if self.unscored > 0 {
            lines.push(format!(
                "{} completion(s) recorded without points; check `tickrewards rules list`.",
                self.unscored
            ));
        }
        for completion in &self.recent {
            let points = completion
                .points
                .map_or_else(|| "unscored".to_string(), |p| format!("{p:+}"));
            lines.push(format!("  {:>8}  {}", points, truncate(&completion.title, 60)));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct CompletionRow {
    pub task_id: String,
    pub title: String,
    pub completed_at: DateTime<Utc>,
    pub recurring: bool,
    pub revoked: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusOutput {
    /// Where the next completion-history window starts. Not a sync time.
    pub sync_cursor: Option<DateTime<Utc>>,
    pub poll_interval_secs: u64,
    pub has_token: bool,
    pub open_tasks: usize,
    pub completed: usize,
    pub quarantined: usize,
    pub balance: i64,
    pub recent: Vec<CompletionRow>,
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!(
                "Sync cursor: {}",
                self.sync_cursor
                    .map_or_else(|| "not set".to_string(), |t| t.to_rfc3339())
            ),
            format!("Poll interval: {}s", self.poll_interval_secs),
            format!(
                "Access token: {}",
                if self.has_token { "configured" } else { "missing" }
            ),
            format!(
                "Open tasks: {}  Completed: {}  Quarantined: {}",
                self.open_tasks, self.completed, self.quarantined
            ),
            format!("Balance: {} points", self.balance),
        ];

        let mut table = list_table(&["completed at", "task", "title", "flags"]);
        for row in &self.recent {
            let mut flags = Vec::new();
            if row.recurring {
                flags.push("recurring");
            }
            if row.revoked {
                flags.push("revoked");
            }
            table.add_row(vec![
                row.completed_at.format("%Y-%m-%d %H:%M").to_string(),
                truncate(&row.task_id, 12),
                truncate(&row.title, 40),
                flags.join(","),
            ]);
        }
        lines.push(String::new());
        lines.push(render_list("completion", &table, self.recent.len()));
        lines.join("\n")
    }
}

pub async fn execute(args: SyncArgs, ctx: AppContext, json_mode: bool) -> Result<()> {
    match args.command {
        SyncCommands::Once => {
            let orchestrator = ctx.orchestrator()?;
            let report = orchestrator.run_tick().await?;
            output(&TickOutput::from(report), json_mode);
        }

        SyncCommands::Start { interval } => {
            let scheduler = ctx.scheduler()?;
            let mut events = scheduler.subscribe();
            scheduler.start(interval.map(Duration::from_secs)).await;

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Interrupt received, waiting for the running tick");
                        break;
                    }
                    event = events.recv() => match event {
                        Ok(event) if event.success => {
                            info!(completed = event.completed_count, "Sync tick succeeded");
                        }
                        Ok(event) => {
                            let status = scheduler.status().await;
                            info!(
                                error = event.error.as_deref().unwrap_or("unknown"),
                                backoff_ms = status.backoff_ms,
                                "Sync tick failed"
                            );
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            info!(skipped, "Missed status events");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }

            scheduler.shutdown().await;
            let recent = scheduler.recent().await;
            if json_mode {
                println!("{}", serde_json::to_string_pretty(&recent).unwrap_or_default());
            } else {
                println!("Stopped. {} completion(s) confirmed this session.", recent.len());
            }
        }

        SyncCommands::Status { limit } => {
            let store = ctx.store.clone();
            let mut completed = store.list_completed().await?;
            completed.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));

            let out = StatusOutput {
                sync_cursor: store.get_cursor().await?,
                poll_interval_secs: ctx.config.sync.poll_interval_secs,
                has_token: ctx.client()?.has_token(),
                open_tasks: store.load_previous_open_snapshot().await?.len(),
                completed: completed.len(),
                quarantined: store.list_removed().await?.len(),
                balance: store.balance().await?,
                recent: completed
                    .into_iter()
                    .take(limit)
                    .map(|c| CompletionRow {
                        task_id: c.task_id,
                        title: c.title,
                        completed_at: c.completed_at,
                        recurring: c.is_recurring_instance,
                        revoked: c.revoked,
                    })
                    .collect(),
            };
            output(&out, json_mode);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn status(sync_cursor: Option<DateTime<Utc>>) -> StatusOutput {
        StatusOutput {
            sync_cursor,
            poll_interval_secs: 180,
            has_token: true,
            open_tasks: 3,
            completed: 1,
            quarantined: 0,
            balance: 12,
            recent: vec![],
        }
    }

    #[test]
    fn test_status_labels_the_cursor() {
        let cursor = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 3).unwrap();
        let human = status(Some(cursor)).to_human();
        assert!(human.contains("Sync cursor: 2025-03-01T09:00:03+00:00"));
        assert!(!human.contains("Last sync"));

        let json = serde_json::to_value(status(Some(cursor))).unwrap();
        assert!(json.get("sync_cursor").is_some());
        assert!(json.get("last_sync_at").is_none());
    }

    #[test]
    fn test_status_without_cursor() {
        assert!(status(None).to_human().contains("Sync cursor: not set"));
    }
}
