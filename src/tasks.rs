//! Background task registry for long-running batch operations.
//!
//! Work runs on tokio tasks behind a bounded [`Semaphore`], so batch
//! jobs queue instead of stampeding the LLM. Each task has a polled
//! status record: `running | completed | failed | cancelled` with a
//! monotonically increasing progress fraction. Cancellation is
//! cooperative; a worker observes the flag at its next checkpoint.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::testgen::{GenerationRequest, TestGenerator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        self != TaskState::Running
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub id: String,
    pub kind: String,
    pub state: TaskState,
    /// Fraction in `[0, 1]`, never decreasing.
    pub progress: f64,
    pub message: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

struct TaskEntry {
    status: TaskStatus,
    cancel: Arc<AtomicBool>,
}

/// Shared process-wide registry. Clone-cheap; all clones see the same
/// task table and pool.
#[derive(Clone)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<BTreeMap<String, TaskEntry>>>,
    pool: Arc<Semaphore>,
}

/// Capability handed to a running worker: report progress, observe
/// cancellation.
#[derive(Clone)]
pub struct TaskHandle {
    id: String,
    tasks: Arc<Mutex<BTreeMap<String, TaskEntry>>>,
    cancel: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Update progress; regressions are ignored so observers always see
    /// a monotonic value.
    pub fn set_progress(&self, done: usize, total: usize, message: impl Into<String>) {
        let fraction = if total == 0 {
            0.0
        } else {
            (done as f64 / total as f64).clamp(0.0, 1.0)
        };
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(entry) = tasks.get_mut(&self.id) {
            if fraction > entry.status.progress {
                entry.status.progress = fraction;
            }
            entry.status.message = message.into();
            entry.status.updated_at = chrono::Utc::now().to_rfc3339();
        }
    }
}

impl TaskRegistry {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(BTreeMap::new())),
            pool: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Spawn a worker under the pool limit and return its task id
    /// immediately. The worker's `Ok(value)` becomes the task result;
    /// `Err` marks the task failed with the error message.
    pub fn spawn<F, Fut>(&self, kind: &str, work: F) -> String
    where
        F: FnOnce(TaskHandle) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let cancel = Arc::new(AtomicBool::new(false));
        {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.insert(
                id.clone(),
                TaskEntry {
                    status: TaskStatus {
                        id: id.clone(),
                        kind: kind.to_string(),
                        state: TaskState::Running,
                        progress: 0.0,
                        message: "queued".to_string(),
                        created_at: now.clone(),
                        updated_at: now,
                        result: None,
                    },
                    cancel: cancel.clone(),
                },
            );
        }

        let handle = TaskHandle {
            id: id.clone(),
            tasks: self.tasks.clone(),
            cancel: cancel.clone(),
        };
        let tasks = self.tasks.clone();
        let pool = self.pool.clone();
        let task_id = id.clone();
        tokio::spawn(async move {
            let _permit = pool.acquire_owned().await;
            if cancel.load(Ordering::SeqCst) {
                finish(&tasks, &task_id, TaskState::Cancelled, "cancelled before start", None);
                return;
            }
            match work(handle).await {
                Ok(result) => {
                    if cancel.load(Ordering::SeqCst) {
                        finish(&tasks, &task_id, TaskState::Cancelled, "cancelled", None);
                    } else {
                        finish(&tasks, &task_id, TaskState::Completed, "done", Some(result));
                    }
                }
                Err(e) if cancel.load(Ordering::SeqCst) => {
                    finish(&tasks, &task_id, TaskState::Cancelled, &e.to_string(), None);
                }
                Err(e) => {
                    warn!(task = %task_id, error = %e, "background task failed");
                    finish(&tasks, &task_id, TaskState::Failed, &e.to_string(), None);
                }
            }
        });
        id
    }

    pub fn status(&self, id: &str) -> Option<TaskStatus> {
        self.tasks.lock().unwrap().get(id).map(|e| e.status.clone())
    }

    pub fn list(&self) -> Vec<TaskStatus> {
        self.tasks
            .lock()
            .unwrap()
            .values()
            .map(|e| e.status.clone())
            .collect()
    }

    /// Request cancellation. Returns false for unknown or already
    /// terminal tasks.
    pub fn cancel(&self, id: &str) -> bool {
        let tasks = self.tasks.lock().unwrap();
        match tasks.get(id) {
            Some(entry) if !entry.status.state.is_terminal() => {
                entry.cancel.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    /// Drop finished tasks from the table; returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap();
        let before = tasks.len();
        tasks.retain(|_, e| !e.status.state.is_terminal());
        before - tasks.len()
    }

    /// Submit bulk generation across every page of a journey's context.
    /// Pages run sequentially; progress advances per completed page and
    /// cancellation is honored at page boundaries.
    pub fn submit_batch_generation(
        &self,
        generator: Arc<TestGenerator>,
        request: GenerationRequest,
    ) -> String {
        self.spawn("generate-batch", move |handle| async move {
            let mut all_cases = Vec::new();
            let mut page = 1;
            let mut total_pages = 1;
            while page <= total_pages {
                if handle.is_cancelled() {
                    anyhow::bail!("cancelled at page {page}");
                }
                let page_request = GenerationRequest {
                    page,
                    ..request.clone()
                };
                let result = generator
                    .generate(&page_request)
                    .await
                    .map_err(|e| anyhow::anyhow!(e.to_string()))?;
                total_pages = result.total_pages;
                all_cases.extend(result.test_cases);
                handle.set_progress(
                    page,
                    total_pages,
                    format!("page {page} of {total_pages}"),
                );
                page += 1;
            }
            info!(
                journey = %request.journey,
                cases = all_cases.len(),
                "batch generation complete"
            );
            Ok(json!({
                "journey": request.journey,
                "total_pages": total_pages,
                "test_cases": all_cases,
            }))
        })
    }
}

fn finish(
    tasks: &Arc<Mutex<BTreeMap<String, TaskEntry>>>,
    id: &str,
    state: TaskState,
    message: &str,
    result: Option<Value>,
) {
    let mut tasks = tasks.lock().unwrap();
    if let Some(entry) = tasks.get_mut(id) {
        entry.status.state = state;
        entry.status.message = message.to_string();
        entry.status.updated_at = chrono::Utc::now().to_rfc3339();
        if state == TaskState::Completed {
            entry.status.progress = 1.0;
        }
        entry.status.result = result;
    }
}
