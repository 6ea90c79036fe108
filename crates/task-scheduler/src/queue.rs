//! Worker pool
//!
//! A fixed number of workers pull copy tasks from a shared queue and report
//! each result, tagged with its batch position, on a results channel.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error};

use common::models::CopyResult;
use model_manager::ModelAdministration;

use crate::executor::CopyExecutor;
use crate::task::CopyTask;

/// A task together with the resources it runs against
pub(crate) struct WorkItem {
    pub task: CopyTask,
    pub source: Arc<dyn ModelAdministration>,
    pub target: Arc<dyn ModelAdministration>,
}

/// Fixed-size pool of copy workers
pub struct WorkerPool {
    /// Number of workers
    size: usize,

    /// Executor shared by the workers
    executor: CopyExecutor,
}

impl WorkerPool {
    /// Creates a pool of `size` workers (at least one)
    pub fn new(size: usize, executor: CopyExecutor) -> Self {
        Self {
            size: size.max(1),
            executor,
        }
    }

    /// Number of workers
    pub fn size(&self) -> usize {
        self.size
    }

    /// Runs every item and returns `(index, result)` pairs in completion order
    ///
    /// Items whose worker died are missing from the output.
    pub(crate) async fn run(&self, items: Vec<WorkItem>) -> Vec<(usize, CopyResult)> {
        if items.is_empty() {
            return Vec::new();
        }

        let capacity = items.len();
        let (work_tx, work_rx) = mpsc::channel::<WorkItem>(capacity);
        let (result_tx, mut result_rx) = mpsc::channel::<(usize, CopyResult)>(capacity);

        for item in items {
            if work_tx.send(item).await.is_err() {
                error!("Copy queue closed while filling");
                break;
            }
        }
        drop(work_tx);

        let work_rx = Arc::new(Mutex::new(work_rx));
        let workers = self.size.min(capacity);
        let mut handles = Vec::with_capacity(workers);

        for worker_id in 0..workers {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let executor = self.executor.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    let next = { work_rx.lock().await.recv().await };
                    let Some(item) = next else {
                        break;
                    };

                    let index = item.task.index;
                    debug!("Worker {} picked up task {}", worker_id, index);

                    let result = executor
                        .execute(item.task, item.source.as_ref(), item.target.as_ref())
                        .await;

                    if result_tx.send((index, result)).await.is_err() {
                        break;
                    }
                }
                debug!("Worker {} finished", worker_id);
            }));
        }
        drop(result_tx);

        let mut results = Vec::with_capacity(capacity);
        while let Some(result) = result_rx.recv().await {
            results.push(result);
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Copy worker terminated abnormally: {}", e);
            }
        }

        results
    }
}
