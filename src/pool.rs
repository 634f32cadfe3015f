//! Bounded worker pool for batch stages.
//!
//! Executes a set of independent tasks concurrently with at most
//! `max_parallel` running at once. Best-effort semantics: a single task's
//! failure never cancels its siblings, and the pool always returns exactly
//! one result per submitted task. The caller decides whether enough tasks
//! succeeded for the pipeline to advance.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::debug;

/// Returns the default worker cap: `min(2 x available cores, 32)`.
pub fn default_parallelism() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cores * 2).min(32)
}

/// One independently executable unit of batch work.
///
/// Tasks are immutable once created and owned exclusively by the worker
/// slot executing them. Output-base names must be unique per batch; the
/// task-creation step enforces this so workers never write to the same
/// files.
#[derive(Debug, Clone)]
pub struct Task {
    /// Unique sequence index within the batch.
    pub index: usize,
    /// Input payload: sample text or a source file path.
    pub payload: String,
    /// Base path all of this task's output files derive from.
    pub output_base: PathBuf,
    /// Assigned resource, e.g. the font to render with.
    pub resource: Option<String>,
}

impl Task {
    /// Creates a new task.
    pub fn new(index: usize, payload: impl Into<String>, output_base: impl Into<PathBuf>) -> Self {
        Self {
            index,
            payload: payload.into(),
            output_base: output_base.into(),
            resource: None,
        }
    }

    /// Assigns a resource (e.g. a font name) to the task.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }
}

/// Outcome of one task. Created by a worker, consumed once by the sequencer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Index of the task this result belongs to.
    pub index: usize,
    /// Whether the task produced its expected artifacts.
    pub success: bool,
    /// Error detail for failed tasks.
    pub error: Option<String>,
    /// Artifact paths produced by the task.
    pub artifacts: Vec<PathBuf>,
}

impl TaskResult {
    /// Creates a successful result with the produced artifacts.
    pub fn success(index: usize, artifacts: Vec<PathBuf>) -> Self {
        Self {
            index,
            success: true,
            error: None,
            artifacts,
        }
    }

    /// Creates a failed result with an error detail.
    pub fn failure(index: usize, error: impl Into<String>) -> Self {
        Self {
            index,
            success: false,
            error: Some(error.into()),
            artifacts: Vec::new(),
        }
    }
}

/// Aggregate view of a finished batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Number of tasks submitted.
    pub total: usize,
    /// Number of tasks that succeeded.
    pub succeeded: usize,
    /// Number of tasks that failed.
    pub failed: usize,
}

impl BatchSummary {
    /// Summarizes a result collection.
    pub fn from_results(results: &[TaskResult]) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
        }
    }

    /// Checks the batch against the configured partial-success policy.
    ///
    /// At least one task must succeed, and the success fraction must reach
    /// `min_ratio`.
    pub fn meets_threshold(&self, min_ratio: f64) -> bool {
        if self.succeeded == 0 {
            return false;
        }
        self.succeeded as f64 / self.total as f64 >= min_ratio
    }
}

/// Runs `worker_fn` over every task with bounded parallelism.
///
/// Submission order is irrelevant; results are returned sorted by task
/// index so downstream aggregation never depends on completion order.
/// There is no cancellation on first error.
pub async fn run_batch<T, F, Fut>(tasks: Vec<T>, max_parallel: usize, worker_fn: F) -> Vec<TaskResult>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = TaskResult>,
{
    if tasks.is_empty() {
        return Vec::new();
    }

    let semaphore = Arc::new(Semaphore::new(max_parallel.max(1)));
    let worker_fn = &worker_fn;

    let futures: Vec<_> = tasks
        .into_iter()
        .map(|task| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                // Semaphore never closes while the batch runs
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                worker_fn(task).await
            }
        })
        .collect();

    let mut results = futures::future::join_all(futures).await;
    results.sort_by_key(|r| r.index);

    let summary = BatchSummary::from_results(&results);
    debug!(
        total = summary.total,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "Batch finished"
    );

    results
}
