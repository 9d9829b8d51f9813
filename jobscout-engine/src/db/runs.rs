//! Pipeline run persistence
//!
//! The durable half of the run registry. A row is written with status
//! `running` before the registry entry exists; terminal transitions clear
//! the registry first and finalize the row second. `logs` is an
//! append-only JSON array of {ts, level, msg, data?} entries.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use super::{ts_from_db, ts_to_db};
use crate::types::RunStatus;

/// One entry in a run's log sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub ts: DateTime<Utc>,
    pub level: String,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Durable pipeline run row.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub id: Uuid,
    pub stage: String,
    pub status: RunStatus,
    pub processed: i64,
    pub failed: i64,
    pub current_step: Option<String>,
    pub logs: Vec<RunLogEntry>,
    pub error: Option<String>,
    pub cascade: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

fn from_row(row: &SqliteRow) -> Result<PipelineRun> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    let logs: String = row.get("logs");

    Ok(PipelineRun {
        id: Uuid::parse_str(&id)?,
        stage: row.get("stage"),
        status: status.parse().unwrap_or(RunStatus::Failed),
        processed: row.get("processed"),
        failed: row.get("failed"),
        current_step: row.get("current_step"),
        logs: serde_json::from_str(&logs).unwrap_or_default(),
        error: row.get("error"),
        cascade: row.get::<i64, _>("cascade") != 0,
        started_at: ts_from_db(row.get("started_at")),
        completed_at: ts_from_db(row.get("completed_at")),
    })
}

const SELECT_COLUMNS: &str =
    "id, stage, status, processed, failed, current_step, logs, error, \"cascade\", started_at, completed_at";

/// Create a run row in status `running` and return its id.
pub async fn create_run(pool: &SqlitePool, stage: &str, cascade: bool) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO pipeline_runs (id, stage, status, current_step, "cascade", started_at)
        VALUES (?, ?, 'running', ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(stage)
    .bind(format!("Starting {stage}"))
    .bind(cascade as i64)
    .bind(ts_to_db(Utc::now()))
    .execute(pool)
    .await?;

    Ok(id)
}

/// Append a log entry and optionally update step/counters in one write.
pub async fn log_to_run(
    pool: &SqlitePool,
    run_id: Uuid,
    level: &str,
    msg: &str,
    data: Option<serde_json::Value>,
    current_step: Option<&str>,
    processed: Option<i64>,
    failed: Option<i64>,
) -> Result<()> {
    let entry = RunLogEntry {
        ts: Utc::now(),
        level: level.to_string(),
        msg: msg.to_string(),
        data,
    };

    sqlx::query(
        r#"
        UPDATE pipeline_runs
        SET logs = json_insert(logs, '$[#]', json(?)),
            current_step = COALESCE(?, current_step),
            processed = COALESCE(?, processed),
            failed = COALESCE(?, failed)
        WHERE id = ?
        "#,
    )
    .bind(serde_json::to_string(&entry)?)
    .bind(current_step)
    .bind(processed)
    .bind(failed)
    .bind(run_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Update progress fields without appending a log line.
pub async fn update_progress(
    pool: &SqlitePool,
    run_id: Uuid,
    current_step: Option<&str>,
    processed: Option<i64>,
    failed: Option<i64>,
) -> Result<()> {
    sqlx::query(
        "UPDATE pipeline_runs
         SET current_step = COALESCE(?, current_step),
             processed = COALESCE(?, processed),
             failed = COALESCE(?, failed)
         WHERE id = ?",
    )
    .bind(current_step)
    .bind(processed)
    .bind(failed)
    .bind(run_id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Close a run. `completed_at` is set exactly when the status leaves
/// `running`.
pub async fn complete_run(
    pool: &SqlitePool,
    run_id: Uuid,
    status: RunStatus,
    processed: i64,
    failed: i64,
    error: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE pipeline_runs
        SET status = ?, completed_at = ?, processed = ?, failed = ?, error = ?,
            current_step = NULL
        WHERE id = ? AND status = 'running'
        "#,
    )
    .bind(status.as_str())
    .bind(ts_to_db(Utc::now()))
    .bind(processed)
    .bind(failed)
    .bind(error)
    .bind(run_id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_run(pool: &SqlitePool, run_id: Uuid) -> Result<Option<PipelineRun>> {
    let row = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM pipeline_runs WHERE id = ?"
    ))
    .bind(run_id.to_string())
    .fetch_optional(pool)
    .await?;
    row.map(|r| from_row(&r)).transpose()
}

/// Runs still marked running (startup reconciliation + status endpoint).
pub async fn running_runs(pool: &SqlitePool) -> Result<Vec<PipelineRun>> {
    let rows = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM pipeline_runs WHERE status = 'running' ORDER BY started_at"
    ))
    .fetch_all(pool)
    .await?;
    rows.iter().map(from_row).collect()
}

/// On process start, close any `running` rows this process does not own.
pub async fn fail_orphaned_runs(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE pipeline_runs
         SET status = 'failed', error = 'orphaned', completed_at = ?, current_step = NULL
         WHERE status = 'running'",
    )
    .bind(ts_to_db(Utc::now()))
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Recent runs, newest first (admin listing).
pub async fn recent_runs(pool: &SqlitePool, limit: i64) -> Result<Vec<PipelineRun>> {
    let rows = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM pipeline_runs ORDER BY started_at DESC LIMIT ?"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;
    use serde_json::json;

    #[tokio::test]
    async fn logs_append_in_order() {
        let pool = init_memory_database().await.unwrap();
        let run_id = create_run(&pool, "crawl_greenhouse", false).await.unwrap();

        log_to_run(&pool, run_id, "info", "first", None, Some("step 1"), Some(1), None)
            .await
            .unwrap();
        log_to_run(
            &pool,
            run_id,
            "warn",
            "second",
            Some(json!({"company": "Acme"})),
            None,
            Some(2),
            Some(1),
        )
        .await
        .unwrap();

        let run = load_run(&pool, run_id).await.unwrap().unwrap();
        assert_eq!(run.logs.len(), 2);
        assert_eq!(run.logs[0].msg, "first");
        assert_eq!(run.logs[1].msg, "second");
        assert_eq!(run.logs[1].level, "warn");
        assert_eq!(run.processed, 2);
        assert_eq!(run.failed, 1);
        assert_eq!(run.current_step.as_deref(), Some("step 1"));
    }

    #[tokio::test]
    async fn completed_at_present_iff_not_running() {
        let pool = init_memory_database().await.unwrap();
        let run_id = create_run(&pool, "embeddings", false).await.unwrap();

        let run = load_run(&pool, run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.completed_at.is_none());

        complete_run(&pool, run_id, RunStatus::Completed, 10, 0, None)
            .await
            .unwrap();
        let run = load_run(&pool, run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.completed_at.is_some());
        assert!(run.current_step.is_none());
    }

    #[tokio::test]
    async fn orphaned_runs_fail_on_reconcile() {
        let pool = init_memory_database().await.unwrap();
        let orphan = create_run(&pool, "discovery", false).await.unwrap();
        let done = create_run(&pool, "enrich", false).await.unwrap();
        complete_run(&pool, done, RunStatus::Completed, 0, 0, None)
            .await
            .unwrap();

        let failed = fail_orphaned_runs(&pool).await.unwrap();
        assert_eq!(failed, 1);

        let run = load_run(&pool, orphan).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("orphaned"));
    }
}
