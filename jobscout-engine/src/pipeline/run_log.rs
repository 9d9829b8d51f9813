//! Durable run logging with progress throttling
//!
//! Bridges a registry entry and its pipeline_runs row: log lines append
//! to the row, progress checkpoints update both, throttled so checkpoint
//! writes land no more than once per 200 ms.

use parking_lot::Mutex;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::registry::OperationRegistry;
use crate::db::runs;
use crate::types::RunStatus;

/// Floor between progress writes.
const PROGRESS_WRITE_INTERVAL: Duration = Duration::from_millis(200);

/// Logger for one stage run.
pub struct RunLogger {
    pool: SqlitePool,
    registry: Arc<OperationRegistry>,
    operation_type: String,
    run_id: Uuid,
    last_progress_write: Mutex<Option<Instant>>,
}

impl RunLogger {
    /// Create the durable run row first, then the logger. The caller
    /// registers the operation with the returned run id.
    pub async fn start(
        pool: &SqlitePool,
        registry: Arc<OperationRegistry>,
        operation_type: &str,
        stage: &str,
        cascade: bool,
    ) -> anyhow::Result<Self> {
        let run_id = runs::create_run(pool, stage, cascade).await?;
        Ok(Self {
            pool: pool.clone(),
            registry,
            operation_type: operation_type.to_string(),
            run_id,
            last_progress_write: Mutex::new(None),
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Append a log entry (always written, never throttled).
    pub async fn log(&self, level: &str, msg: &str, data: Option<serde_json::Value>) {
        match level {
            "error" => tracing::error!(run_id = %self.run_id, "{msg}"),
            "warn" => tracing::warn!(run_id = %self.run_id, "{msg}"),
            _ => tracing::info!(run_id = %self.run_id, "{msg}"),
        }
        if let Err(error) =
            runs::log_to_run(&self.pool, self.run_id, level, msg, data, None, None, None).await
        {
            tracing::warn!(run_id = %self.run_id, error = %error, "Failed to append run log");
        }
    }

    /// Progress checkpoint. The registry entry updates immediately; the
    /// database row at most once per interval.
    pub async fn progress(
        &self,
        current_step: &str,
        processed: Option<i64>,
        failed: Option<i64>,
        progress: Option<serde_json::Value>,
    ) {
        self.registry
            .update_progress(&self.operation_type, Some(current_step), progress);

        let due = {
            let mut last = self.last_progress_write.lock();
            match *last {
                Some(at) if at.elapsed() < PROGRESS_WRITE_INTERVAL => false,
                _ => {
                    *last = Some(Instant::now());
                    true
                }
            }
        };
        if !due {
            return;
        }

        if let Err(error) =
            runs::update_progress(&self.pool, self.run_id, Some(current_step), processed, failed)
                .await
        {
            tracing::warn!(run_id = %self.run_id, error = %error, "Failed to write progress");
        }
    }

    /// Close the durable row. The registry entry is released by its
    /// guard, in that order: registry first, row second.
    pub async fn finish(
        &self,
        status: RunStatus,
        processed: i64,
        failed: i64,
        error: Option<&str>,
    ) {
        if let Err(db_error) =
            runs::complete_run(&self.pool, self.run_id, status, processed, failed, error).await
        {
            tracing::error!(run_id = %self.run_id, error = %db_error, "Failed to finalize run row");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;

    #[tokio::test]
    async fn progress_writes_are_throttled() {
        let pool = init_memory_database().await.unwrap();
        let registry = OperationRegistry::new();
        let logger = RunLogger::start(&pool, Arc::clone(&registry), "crawl_all", "crawl", false)
            .await
            .unwrap();
        let _guard = registry.clone().try_start("crawl_all", Some(logger.run_id())).unwrap();

        // Burst of checkpoints: only the first lands in the row
        for i in 0..10 {
            logger
                .progress(&format!("step {i}"), Some(i), None, None)
                .await;
        }

        let run = runs::load_run(&pool, logger.run_id()).await.unwrap().unwrap();
        assert_eq!(run.current_step.as_deref(), Some("step 0"));

        // The registry entry always tracks the newest step
        let ops = registry.running_operations();
        assert_eq!(ops[0].current_step, "step 9");
    }

    #[tokio::test]
    async fn finish_closes_the_row() {
        let pool = init_memory_database().await.unwrap();
        let registry = OperationRegistry::new();
        let logger = RunLogger::start(&pool, registry, "embeddings", "embeddings", true)
            .await
            .unwrap();

        logger.log("info", "embedding 12 jobs", None).await;
        logger.finish(RunStatus::Completed, 12, 0, None).await;

        let run = runs::load_run(&pool, logger.run_id()).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.processed, 12);
        assert!(run.cascade);
        assert_eq!(run.logs.len(), 1);
    }
}
