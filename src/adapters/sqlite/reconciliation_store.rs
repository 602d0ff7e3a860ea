//! SQLite implementation of the ReconciliationStore.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::adapters::sqlite::{
    format_datetime, parse_datetime, parse_json_or_default, parse_optional_datetime, parse_uuid,
    tags_to_json,
};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    CompletedTaskRecord, LedgerEntry, LedgerSource, OpenTaskRecord, RemovalReason,
    RemovedTaskRecord,
};
use crate::domain::ports::{ReconciliationStore, Revocation, TickCommit};

const CURSOR_KEY: &str = "last_sync_at";

#[derive(Clone)]
pub struct SqliteReconciliationStore {
    pool: SqlitePool,
}

impl SqliteReconciliationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OpenTaskRow {
    id: String,
    title: String,
    tags: Option<String>,
    list_name: Option<String>,
    project_id: Option<String>,
    due_at: Option<String>,
    created_at: Option<String>,
    last_seen_at: String,
    etag: Option<String>,
}

fn row_to_open_task(row: OpenTaskRow) -> DomainResult<OpenTaskRecord> {
    Ok(OpenTaskRecord {
        id: row.id,
        title: row.title,
        tags: parse_json_or_default(row.tags)?,
        list_name: row.list_name,
        project_id: row.project_id,
        due_at: parse_optional_datetime(row.due_at)?,
        created_at: parse_optional_datetime(row.created_at)?,
        last_seen_at: parse_datetime(&row.last_seen_at)?,
        etag: row.etag,
    })
}

#[derive(Debug, sqlx::FromRow)]
struct CompletedTaskRow {
    id: String,
    task_id: String,
    title: String,
    tags: Option<String>,
    project_id: Option<String>,
    list_name: Option<String>,
    due_at: Option<String>,
    completed_at: String,
    is_recurring_instance: i32,
    series_key: Option<String>,
    revoked: i32,
    revoked_at: Option<String>,
}

fn row_to_completed(row: CompletedTaskRow) -> DomainResult<CompletedTaskRecord> {
    Ok(CompletedTaskRecord {
        id: parse_uuid(&row.id)?,
        task_id: row.task_id,
        title: row.title,
        tags: parse_json_or_default(row.tags)?,
        project_id: row.project_id,
        list_name: row.list_name,
        due_at: parse_optional_datetime(row.due_at)?,
        completed_at: parse_datetime(&row.completed_at)?,
        is_recurring_instance: row.is_recurring_instance != 0,
        series_key: row.series_key,
        revoked: row.revoked != 0,
        revoked_at: parse_optional_datetime(row.revoked_at)?,
    })
}

#[derive(Debug, sqlx::FromRow)]
struct RemovedTaskRow {
    id: String,
    task_id: String,
    title: String,
    tags: Option<String>,
    project_id: Option<String>,
    list_name: Option<String>,
    due_at: Option<String>,
    removed_at: String,
    reason: String,
}

fn row_to_removed(row: RemovedTaskRow) -> DomainResult<RemovedTaskRecord> {
    let reason = RemovalReason::from_str(&row.reason).ok_or_else(|| {
        DomainError::SerializationError(format!("Unknown removal reason: {}", row.reason))
    })?;
    Ok(RemovedTaskRecord {
        id: parse_uuid(&row.id)?,
        task_id: row.task_id,
        title: row.title,
        tags: parse_json_or_default(row.tags)?,
        project_id: row.project_id,
        list_name: row.list_name,
        due_at: parse_optional_datetime(row.due_at)?,
        removed_at: parse_datetime(&row.removed_at)?,
        reason,
    })
}

#[derive(Debug, sqlx::FromRow)]
struct LedgerRow {
    id: String,
    created_at: String,
    amount: i64,
    source: String,
    reason: String,
    related_task_id: Option<String>,
    metadata_json: String,
}

fn row_to_ledger(row: LedgerRow) -> DomainResult<LedgerEntry> {
    let source = LedgerSource::from_str(&row.source).ok_or_else(|| {
        DomainError::SerializationError(format!("Unknown ledger source: {}", row.source))
    })?;
    Ok(LedgerEntry {
        id: parse_uuid(&row.id)?,
        created_at: parse_datetime(&row.created_at)?,
        amount: row.amount,
        source,
        reason: row.reason,
        related_task_id: row.related_task_id,
        metadata_json: row.metadata_json,
    })
}

async fn upsert_open_tasks(conn: &mut SqliteConnection, tasks: &[OpenTaskRecord]) -> DomainResult<()> {
    for task in tasks {
        sqlx::query(
            r#"INSERT INTO open_tasks
               (id, title, tags, list_name, project_id, due_at, created_at, last_seen_at, etag)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 title = excluded.title,
                 tags = excluded.tags,
                 list_name = excluded.list_name,
                 project_id = excluded.project_id,
                 due_at = excluded.due_at,
                 created_at = excluded.created_at,
                 last_seen_at = excluded.last_seen_at,
                 etag = excluded.etag"#,
        )
        .bind(&task.id)
        .bind(&task.title)
        .bind(tags_to_json(&task.tags)?)
        .bind(&task.list_name)
        .bind(&task.project_id)
        .bind(task.due_at.as_ref().map(format_datetime))
        .bind(task.created_at.as_ref().map(format_datetime))
        .bind(format_datetime(&task.last_seen_at))
        .bind(&task.etag)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn prune_open(conn: &mut SqliteConnection, ids: &[String]) -> DomainResult<u64> {
    let keep = serde_json::to_string(ids)?;
    let result = sqlx::query("DELETE FROM open_tasks WHERE id NOT IN (SELECT value FROM json_each(?))")
        .bind(keep)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

async fn insert_ledger(conn: &mut SqliteConnection, entry: &LedgerEntry) -> DomainResult<()> {
    sqlx::query(
        r#"INSERT INTO transactions
           (id, created_at, amount, source, reason, related_task_id, metadata_json)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(entry.id.to_string())
    .bind(format_datetime(&entry.created_at))
    .bind(entry.amount)
    .bind(entry.source.as_str())
    .bind(&entry.reason)
    .bind(&entry.related_task_id)
    .bind(&entry.metadata_json)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_completed(conn: &mut SqliteConnection, record: &CompletedTaskRecord) -> DomainResult<()> {
    sqlx::query(
        r#"INSERT INTO completed_tasks
           (id, task_id, title, tags, project_id, list_name, due_at, completed_at,
            is_recurring_instance, series_key, revoked, revoked_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(record.id.to_string())
    .bind(&record.task_id)
    .bind(&record.title)
    .bind(tags_to_json(&record.tags)?)
    .bind(&record.project_id)
    .bind(&record.list_name)
    .bind(record.due_at.as_ref().map(format_datetime))
    .bind(format_datetime(&record.completed_at))
    .bind(i32::from(record.is_recurring_instance))
    .bind(&record.series_key)
    .bind(i32::from(record.revoked))
    .bind(record.revoked_at.as_ref().map(format_datetime))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_removed(conn: &mut SqliteConnection, record: &RemovedTaskRecord) -> DomainResult<()> {
    sqlx::query(
        r#"INSERT INTO removed_tasks
           (id, task_id, title, tags, project_id, list_name, due_at, removed_at, reason)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(record.id.to_string())
    .bind(&record.task_id)
    .bind(&record.title)
    .bind(tags_to_json(&record.tags)?)
    .bind(&record.project_id)
    .bind(&record.list_name)
    .bind(record.due_at.as_ref().map(format_datetime))
    .bind(format_datetime(&record.removed_at))
    .bind(record.reason.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn mark_revoked(conn: &mut SqliteConnection, revocation: &Revocation) -> DomainResult<()> {
    let result = sqlx::query(
        "UPDATE completed_tasks SET revoked = 1, revoked_at = ? WHERE id = ? AND revoked = 0",
    )
    .bind(format_datetime(&revocation.revoked_at))
    .bind(revocation.completion_id.to_string())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DomainError::ValidationFailed(format!(
            "No active completion {} for task {}",
            revocation.completion_id, revocation.task_id
        )));
    }
    Ok(())
}

async fn write_cursor(conn: &mut SqliteConnection, at: &DateTime<Utc>) -> DomainResult<()> {
    sqlx::query(
        "INSERT INTO app_state (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(CURSOR_KEY)
    .bind(format_datetime(at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl ReconciliationStore for SqliteReconciliationStore {
    async fn load_previous_open_snapshot(&self) -> DomainResult<Vec<OpenTaskRecord>> {
        let rows: Vec<OpenTaskRow> = sqlx::query_as("SELECT * FROM open_tasks ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_open_task).collect()
    }

    async fn replace_open_snapshot(&self, tasks: &[OpenTaskRecord]) -> DomainResult<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_open_tasks(&mut conn, tasks).await
    }

    async fn prune_open_except(&self, ids: &[String]) -> DomainResult<u64> {
        let mut conn = self.pool.acquire().await?;
        prune_open(&mut conn, ids).await
    }

    async fn append_ledger_entry(&self, entry: &LedgerEntry) -> DomainResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_ledger(&mut conn, entry).await
    }

    async fn append_completed_record(&self, record: &CompletedTaskRecord) -> DomainResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_completed(&mut conn, record).await
    }

    async fn append_removed_record(&self, record: &RemovedTaskRecord) -> DomainResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_removed(&mut conn, record).await
    }

    async fn revoke_completed_record(&self, revocation: &Revocation) -> DomainResult<()> {
        let mut conn = self.pool.acquire().await?;
        mark_revoked(&mut conn, revocation).await
    }

    async fn find_active_completion(&self, task_id: &str) -> DomainResult<Option<CompletedTaskRecord>> {
        let row: Option<CompletedTaskRow> = sqlx::query_as(
            r#"SELECT * FROM completed_tasks
               WHERE task_id = ? AND revoked = 0 AND is_recurring_instance = 0
               ORDER BY completed_at DESC LIMIT 1"#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_completed).transpose()
    }

    async fn find_award_for_completion(&self, completion_id: Uuid) -> DomainResult<Option<LedgerEntry>> {
        let row: Option<LedgerRow> = sqlx::query_as(
            r#"SELECT * FROM transactions t
               WHERE t.source = 'task'
                 AND json_extract(t.metadata_json, '$.completionId') = ?
                 AND NOT EXISTS (
                   SELECT 1 FROM transactions r
                   WHERE r.source = 'task_revoked'
                     AND json_extract(r.metadata_json, '$.reversedEntryId') = t.id
                 )
               ORDER BY t.created_at DESC LIMIT 1"#,
        )
        .bind(completion_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_ledger).transpose()
    }

    async fn get_cursor(&self) -> DomainResult<Option<DateTime<Utc>>> {
        let value: Option<(String,)> = sqlx::query_as("SELECT value FROM app_state WHERE key = ?")
            .bind(CURSOR_KEY)
            .fetch_optional(&self.pool)
            .await?;
        value.map(|(v,)| parse_datetime(&v)).transpose()
    }

    async fn set_cursor(&self, at: DateTime<Utc>) -> DomainResult<()> {
        let mut conn = self.pool.acquire().await?;
        write_cursor(&mut conn, &at).await
    }

    async fn commit_tick(&self, commit: &TickCommit) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;

        for record in &commit.completed {
            insert_completed(&mut tx, record).await?;
        }
        for record in &commit.removed {
            insert_removed(&mut tx, record).await?;
        }
        for entry in &commit.ledger {
            insert_ledger(&mut tx, entry).await?;
        }
        for revocation in &commit.revocations {
            mark_revoked(&mut tx, revocation).await?;
        }

        upsert_open_tasks(&mut tx, &commit.open_snapshot).await?;
        let ids: Vec<String> = commit.open_snapshot.iter().map(|t| t.id.clone()).collect();
        let pruned = prune_open(&mut tx, &ids).await?;
        write_cursor(&mut tx, &commit.cursor).await?;

        tx.commit().await?;
        debug!(
            completed = commit.completed.len(),
            removed = commit.removed.len(),
            ledger = commit.ledger.len(),
            pruned,
            "Tick committed to SQLite"
        );
        Ok(())
    }

    async fn balance(&self) -> DomainResult<i64> {
        let (sum,): (i64,) = sqlx::query_as("SELECT COALESCE(SUM(amount), 0) FROM transactions")
            .fetch_one(&self.pool)
            .await?;
        Ok(sum)
    }

    async fn list_ledger(&self, limit: usize) -> DomainResult<Vec<LedgerEntry>> {
        let rows: Vec<LedgerRow> =
            sqlx::query_as("SELECT * FROM transactions ORDER BY created_at DESC, rowid DESC LIMIT ?")
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(row_to_ledger).collect()
    }

    async fn list_completed(&self) -> DomainResult<Vec<CompletedTaskRecord>> {
        let rows: Vec<CompletedTaskRow> =
            sqlx::query_as("SELECT * FROM completed_tasks ORDER BY completed_at, rowid")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(row_to_completed).collect()
    }

    async fn list_removed(&self) -> DomainResult<Vec<RemovedTaskRecord>> {
        let rows: Vec<RemovedTaskRow> =
            sqlx::query_as("SELECT * FROM removed_tasks ORDER BY removed_at, rowid")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(row_to_removed).collect()
    }
}
