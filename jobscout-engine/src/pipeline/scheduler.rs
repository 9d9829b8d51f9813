//! Scheduler: periodic full-pipeline driver
//!
//! Single driver with a configurable interval. Starting while running and
//! stopping while stopped are no-ops. A tick that finds a full pipeline
//! already in flight is skipped and logged.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{FullPipelineFlags, Pipeline};

pub const DEFAULT_INTERVAL_HOURS: i64 = 6;

#[derive(Default, Clone)]
struct Timing {
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
}

struct Inner {
    cancel: Option<CancellationToken>,
    interval_hours: i64,
}

/// Periodic trigger for full pipeline runs.
pub struct PipelineScheduler {
    pipeline: Arc<Pipeline>,
    inner: Mutex<Inner>,
    timing: Arc<Mutex<Timing>>,
}

impl PipelineScheduler {
    pub fn new(pipeline: Arc<Pipeline>) -> Arc<Self> {
        Arc::new(Self {
            pipeline,
            inner: Mutex::new(Inner {
                cancel: None,
                interval_hours: DEFAULT_INTERVAL_HOURS,
            }),
            timing: Arc::new(Mutex::new(Timing::default())),
        })
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().cancel.is_some()
    }

    /// Start ticking. A second start is a no-op.
    pub fn start(&self, interval_hours: Option<i64>) {
        let mut inner = self.inner.lock();
        if inner.cancel.is_some() {
            tracing::warn!("Scheduler already running");
            return;
        }

        let interval_hours = interval_hours.unwrap_or(DEFAULT_INTERVAL_HOURS).max(1);
        inner.interval_hours = interval_hours;

        let cancel = CancellationToken::new();
        inner.cancel = Some(cancel.clone());

        let pipeline = Arc::clone(&self.pipeline);
        let timing = Arc::clone(&self.timing);
        tokio::spawn(async move {
            let interval = Duration::from_secs(interval_hours as u64 * 3600);
            loop {
                timing.lock().next_run = Some(Utc::now() + ChronoDuration::hours(interval_hours));

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                timing.lock().last_run = Some(Utc::now());
                match Arc::clone(&pipeline)
                    .start_full_pipeline(FullPipelineFlags::default())
                    .await
                {
                    Ok(run_id) => {
                        tracing::info!(%run_id, "Scheduler started full pipeline run");
                    }
                    Err(error) => {
                        tracing::warn!(error = %error, "Scheduler tick skipped");
                    }
                }
            }
            tracing::info!("Scheduler loop exited");
        });

        tracing::info!(interval_hours, "Pipeline scheduler started");
    }

    /// Stop ticking. Stopping a stopped scheduler is a no-op. An
    /// in-flight pipeline run is not cancelled.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        match inner.cancel.take() {
            Some(cancel) => {
                cancel.cancel();
                self.timing.lock().next_run = None;
                tracing::info!("Pipeline scheduler stopped");
            }
            None => {
                tracing::debug!("Scheduler already stopped");
            }
        }
    }

    pub fn status(&self) -> serde_json::Value {
        let inner = self.inner.lock();
        let timing = self.timing.lock().clone();
        json!({
            "running": inner.cancel.is_some(),
            "interval_hours": inner.interval_hours,
            "last_run": timing.last_run,
            "next_run": timing.next_run,
        })
    }
}
