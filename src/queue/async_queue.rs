//! Priority-ordered async task queue.
//!
//! A fixed pool of tokio worker loops shares one ready heap. Higher numeric
//! priority is served first; among equal priorities a monotone sequence
//! number keeps dequeue order strictly FIFO. Workers poll with a bounded
//! wait so a stop signal is observed promptly.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::Result;
use crate::metrics::{
    QUEUE_DEPTH, TASKS_COMPLETED_TOTAL, TASKS_ENQUEUED_TOTAL, TASKS_FAILED_TOTAL,
    TASKS_RETRIED_TOTAL,
};

use super::{Task, TaskId, TaskStatus};

/// Default worker pool size for the async queue.
pub const DEFAULT_ASYNC_WORKERS: usize = 5;

/// Default bounded wait between stop-signal checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Boxed future produced by one invocation of a task's work callable.
pub type TaskFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>;

/// Re-invocable unit of work; retries call it again.
type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

struct TaskEntry {
    task: Task,
    work: TaskFn,
}

/// Heap entry: priority descending, then insertion order ascending.
struct ReadyItem {
    priority: i32,
    seq: u64,
    task_id: TaskId,
}

impl PartialEq for ReadyItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for ReadyItem {}

impl PartialOrd for ReadyItem {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyItem {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: higher priority wins, then the lower sequence number.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Inner {
    ready: Mutex<BinaryHeap<ReadyItem>>,
    tasks: DashMap<TaskId, TaskEntry>,
    notify: Notify,
    running: AtomicBool,
    seq: AtomicU64,
    poll_interval: Duration,
}

impl Inner {
    fn ready_guard(&self) -> MutexGuard<'_, BinaryHeap<ReadyItem>> {
        match self.ready.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn push_ready(&self, priority: i32, task_id: TaskId) {
        {
            let mut ready = self.ready_guard();
            ready.push(ReadyItem {
                priority,
                seq: self.seq.fetch_add(1, Ordering::Relaxed),
                task_id,
            });
            QUEUE_DEPTH.set(ready.len() as i64);
        }
        self.notify.notify_one();
    }

    fn pop_ready(&self) -> Option<ReadyItem> {
        let mut ready = self.ready_guard();
        let item = ready.pop();
        QUEUE_DEPTH.set(ready.len() as i64);
        item
    }
}

/// Priority task queue backed by tokio worker tasks.
pub struct AsyncTaskQueue {
    inner: Arc<Inner>,
    shutdown_tx: broadcast::Sender<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    max_workers: usize,
}

impl AsyncTaskQueue {
    /// Create a stopped queue with the default poll interval.
    pub fn new(max_workers: usize) -> Self {
        Self::with_poll_interval(max_workers, DEFAULT_POLL_INTERVAL)
    }

    /// Create a stopped queue with a custom worker poll interval.
    pub fn with_poll_interval(max_workers: usize, poll_interval: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(Inner {
                ready: Mutex::new(BinaryHeap::new()),
                tasks: DashMap::new(),
                notify: Notify::new(),
                running: AtomicBool::new(false),
                seq: AtomicU64::new(0),
                poll_interval,
            }),
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
            max_workers: max_workers.max(1),
        }
    }

    /// Spawn the worker pool. Idempotent.
    pub async fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut workers = match self.workers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for worker_id in 0..self.max_workers {
            let inner = self.inner.clone();
            let shutdown = self.shutdown_tx.subscribe();
            workers.push(tokio::spawn(worker_loop(inner, shutdown, worker_id)));
        }

        tracing::info!(workers = self.max_workers, "Async task queue started");
    }

    /// Signal workers to exit and await them all. Idempotent.
    ///
    /// A task mid-execution is not interrupted; its worker finishes the
    /// current body before exiting.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let _ = self.shutdown_tx.send(());
        self.inner.notify.notify_waiters();

        let handles: Vec<JoinHandle<()>> = {
            let mut workers = match self.workers.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            workers.drain(..).collect()
        };
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker task aborted during shutdown");
            }
        }

        tracing::info!("Async task queue stopped");
    }

    /// Register a unit of work and make it ready.
    ///
    /// Returns the fresh task id immediately; execution happens on the
    /// worker pool. The callable is re-invoked on every retry, so it must
    /// capture whatever state it needs by value.
    pub fn enqueue<F, Fut>(&self, work: F, priority: i32, max_retries: u32) -> TaskId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        let task_id = Uuid::new_v4();
        let work: TaskFn = Arc::new(move || -> TaskFuture { Box::pin(work()) });
        self.inner.tasks.insert(
            task_id,
            TaskEntry {
                task: Task::new(task_id, priority, max_retries),
                work,
            },
        );
        self.inner.push_ready(priority, task_id);
        TASKS_ENQUEUED_TOTAL.inc();

        tracing::debug!(%task_id, priority, "Task enqueued");
        task_id
    }

    /// Read-only snapshot of a task.
    pub fn get_task(&self, task_id: TaskId) -> Option<Task> {
        self.inner.tasks.get(&task_id).map(|entry| entry.task.clone())
    }

    /// Tasks currently waiting in the ready heap.
    pub fn depth(&self) -> usize {
        self.inner.ready_guard().len()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }
}

async fn worker_loop(inner: Arc<Inner>, mut shutdown: broadcast::Receiver<()>, worker_id: usize) {
    tracing::debug!(worker_id, "Worker started");

    while inner.running.load(Ordering::SeqCst) {
        let Some(item) = inner.pop_ready() else {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::timeout(inner.poll_interval, inner.notify.notified()) => {}
            }
            continue;
        };
        run_task(&inner, item.task_id, worker_id).await;
    }

    tracing::debug!(worker_id, "Worker stopped");
}

async fn run_task(inner: &Inner, task_id: TaskId, worker_id: usize) {
    // Claim the task; the entry guard is dropped before the work runs so
    // status reads never block behind a long task body.
    let work = {
        let Some(mut entry) = inner.tasks.get_mut(&task_id) else {
            tracing::debug!(worker_id, %task_id, "Task no longer tracked, skipping");
            return;
        };
        entry.task.status = TaskStatus::Running;
        entry.task.started_at = Some(Utc::now());
        entry.work.clone()
    };

    tracing::debug!(worker_id, %task_id, "Task started");

    match work().await {
        Ok(value) => {
            if let Some(mut entry) = inner.tasks.get_mut(&task_id) {
                entry.task.result = Some(value);
                entry.task.status = TaskStatus::Completed;
                entry.task.completed_at = Some(Utc::now());
            }
            TASKS_COMPLETED_TOTAL.inc();
            tracing::debug!(worker_id, %task_id, "Task completed");
        }
        Err(e) => {
            let retry = {
                let Some(mut entry) = inner.tasks.get_mut(&task_id) else {
                    return;
                };
                entry.task.error = Some(e.to_string());
                if entry.task.retry_count < entry.task.max_retries {
                    entry.task.retry_count += 1;
                    entry.task.status = TaskStatus::Retrying;
                    Some((
                        entry.task.priority + 1,
                        entry.task.retry_count,
                        entry.task.max_retries,
                    ))
                } else {
                    entry.task.status = TaskStatus::Failed;
                    entry.task.completed_at = Some(Utc::now());
                    None
                }
            };

            match retry {
                Some((requeue_priority, retry_count, max_retries)) => {
                    // Elevated priority puts retries ahead of fresh work of
                    // the original priority.
                    inner.push_ready(requeue_priority, task_id);
                    TASKS_RETRIED_TOTAL.inc();
                    tracing::warn!(
                        worker_id,
                        %task_id,
                        retry_count,
                        max_retries,
                        error = %e,
                        "Task failed, re-queued for retry"
                    );
                }
                None => {
                    TASKS_FAILED_TOTAL.inc();
                    tracing::error!(worker_id, %task_id, error = %e, "Task failed permanently");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    async fn wait_terminal(queue: &AsyncTaskQueue, task_id: TaskId) -> Task {
        for _ in 0..300 {
            if let Some(task) = queue.get_task(task_id) {
                if task.status.is_terminal() {
                    return task;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {task_id} did not reach a terminal state");
    }

    fn test_queue(workers: usize) -> AsyncTaskQueue {
        AsyncTaskQueue::with_poll_interval(workers, Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_enqueue_and_complete() {
        let queue = test_queue(2);
        queue.start().await;

        let task_id = queue.enqueue(|| async { Ok(json!({"answer": 42})) }, 0, 3);
        let task = wait_terminal(&queue, task_id).await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(json!({"answer": 42})));
        assert!(task.started_at.is_some());
        assert!(task.completed_at.is_some());

        queue.stop().await;
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let queue = test_queue(1);
        queue.start().await;

        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let task_id = queue.enqueue(
            move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(DispatchError::Archive("transient".to_string()))
                    } else {
                        Ok(json!("ok"))
                    }
                }
            },
            0,
            3,
        );

        let task = wait_terminal(&queue, task_id).await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.retry_count, 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        queue.stop().await;
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let queue = test_queue(2);
        queue.start().await;
        queue.start().await;
        assert!(queue.is_running());

        queue.stop().await;
        queue.stop().await;
        assert!(!queue.is_running());
    }

    #[tokio::test]
    async fn test_get_task_snapshot_is_stable_before_start() {
        let queue = test_queue(1);
        let task_id = queue.enqueue(|| async { Ok(json!(null)) }, 2, 3);

        let first = queue.get_task(task_id).expect("task tracked");
        let second = queue.get_task(task_id).expect("task tracked");
        assert_eq!(first, second);
        assert_eq!(first.status, TaskStatus::Pending);
        assert_eq!(queue.depth(), 1);
    }

    #[test]
    fn test_ready_ordering_is_priority_then_fifo() {
        let mut heap = BinaryHeap::new();
        let ids: Vec<TaskId> = (0..4).map(|_| Uuid::new_v4()).collect();
        heap.push(ReadyItem { priority: 0, seq: 0, task_id: ids[0] });
        heap.push(ReadyItem { priority: 2, seq: 1, task_id: ids[1] });
        heap.push(ReadyItem { priority: 2, seq: 2, task_id: ids[2] });
        heap.push(ReadyItem { priority: 1, seq: 3, task_id: ids[3] });

        let order: Vec<TaskId> = std::iter::from_fn(|| heap.pop().map(|i| i.task_id)).collect();
        assert_eq!(order, vec![ids[1], ids[2], ids[3], ids[0]]);
    }
}
