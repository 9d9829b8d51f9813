//! Run registry: the live view of in-flight operations
//!
//! Operations are keyed by type (`discovery`, `crawl_greenhouse`,
//! `embeddings`, `full_pipeline`, ...). Different keys run concurrently;
//! a key can only be held once. Each entry carries a cancellation token
//! and the id of its durable pipeline_runs row.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Public snapshot of one running operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationStatus {
    pub operation_type: String,
    pub started_at: DateTime<Utc>,
    pub current_step: String,
    pub progress: serde_json::Value,
    pub run_id: Option<Uuid>,
}

struct Entry {
    status: OperationStatus,
    cancel: CancellationToken,
}

/// Process-wide registry of running operations.
#[derive(Default)]
pub struct OperationRegistry {
    running: Mutex<HashMap<String, Entry>>,
}

impl OperationRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim an operation key. Returns a guard that releases the key on
    /// drop (including panics), or None when the key is already held.
    /// Takes an owned Arc so the guard can hold the registry alive.
    pub fn try_start(
        self: Arc<Self>,
        operation_type: &str,
        run_id: Option<Uuid>,
    ) -> Option<OperationGuard> {
        {
            let mut running = self.running.lock();
            if running.contains_key(operation_type) {
                return None;
            }

            let cancel = CancellationToken::new();
            running.insert(
                operation_type.to_string(),
                Entry {
                    status: OperationStatus {
                        operation_type: operation_type.to_string(),
                        started_at: Utc::now(),
                        current_step: String::new(),
                        progress: serde_json::Value::Object(Default::default()),
                        run_id,
                    },
                    cancel: cancel.clone(),
                },
            );

            tracing::info!(operation = operation_type, "Operation started");
            Some(OperationGuard {
                registry: Arc::clone(&self),
                operation_type: operation_type.to_string(),
                cancel,
            })
        }
    }

    fn end(&self, operation_type: &str) {
        if self.running.lock().remove(operation_type).is_some() {
            tracing::info!(operation = operation_type, "Operation ended");
        }
    }

    pub fn is_running(&self, operation_type: &str) -> bool {
        self.running.lock().contains_key(operation_type)
    }

    pub fn any_running(&self) -> bool {
        !self.running.lock().is_empty()
    }

    /// Update step/progress for a running operation.
    pub fn update_progress(
        &self,
        operation_type: &str,
        current_step: Option<&str>,
        progress: Option<serde_json::Value>,
    ) {
        let mut running = self.running.lock();
        if let Some(entry) = running.get_mut(operation_type) {
            if let Some(step) = current_step {
                entry.status.current_step = step.to_string();
            }
            if let Some(progress) = progress {
                entry.status.progress = progress;
            }
        }
    }

    /// Snapshot of all running operations.
    pub fn running_operations(&self) -> Vec<OperationStatus> {
        let mut operations: Vec<OperationStatus> = self
            .running
            .lock()
            .values()
            .map(|entry| entry.status.clone())
            .collect();
        operations.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        operations
    }

    /// Signal cancellation for an operation. Returns false for unknown
    /// keys. The entry leaves the registry when its guard drops.
    pub fn cancel(&self, operation_type: &str) -> bool {
        let running = self.running.lock();
        match running.get(operation_type) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }
}

/// Holds an operation key; dropping releases it.
pub struct OperationGuard {
    registry: Arc<OperationRegistry>,
    operation_type: String,
    cancel: CancellationToken,
}

impl OperationGuard {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn operation_type(&self) -> &str {
        &self.operation_type
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.registry.end(&self.operation_type);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_conflicts_until_released() {
        let registry = OperationRegistry::new();

        let guard = registry.clone().try_start("crawl_greenhouse", None).unwrap();
        assert!(registry.clone().try_start("crawl_greenhouse", None).is_none());
        assert!(registry.is_running("crawl_greenhouse"));

        drop(guard);
        assert!(!registry.is_running("crawl_greenhouse"));
        assert!(registry.clone().try_start("crawl_greenhouse", None).is_some());
    }

    #[test]
    fn different_keys_run_concurrently() {
        let registry = OperationRegistry::new();
        let _a = registry.clone().try_start("crawl_greenhouse", None).unwrap();
        let _b = registry.clone().try_start("embeddings", None).unwrap();

        assert_eq!(registry.running_operations().len(), 2);
        assert!(registry.any_running());
    }

    #[test]
    fn cancel_signals_token() {
        let registry = OperationRegistry::new();
        let guard = registry.clone().try_start("enrich", None).unwrap();
        let token = guard.cancel_token();

        assert!(!token.is_cancelled());
        assert!(registry.cancel("enrich"));
        assert!(token.is_cancelled());
        assert!(!registry.cancel("unknown"));
    }

    #[test]
    fn guard_releases_on_panic() {
        let registry = OperationRegistry::new();
        let registry_clone = Arc::clone(&registry);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = registry_clone.clone().try_start("discovery", None).unwrap();
            panic!("stage blew up");
        }));
        assert!(result.is_err());
        assert!(!registry.is_running("discovery"));
    }

    #[test]
    fn progress_updates_are_visible() {
        let registry = OperationRegistry::new();
        let _guard = registry.clone().try_start("crawl_lever", None).unwrap();

        registry.update_progress(
            "crawl_lever",
            Some("Batch 1: 5/20"),
            Some(serde_json::json!({"completed": 5, "total": 20})),
        );

        let ops = registry.running_operations();
        assert_eq!(ops[0].current_step, "Batch 1: 5/20");
        assert_eq!(ops[0].progress["completed"], 5);
    }
}
