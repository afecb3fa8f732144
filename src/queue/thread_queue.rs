//! Thread-pool-backed task queue.
//!
//! The alternative backend for callers without an async runtime: a FIFO
//! ready queue and a task registry behind one lock each, serviced by OS
//! threads. Work items are synchronous callables. Ordering is plain FIFO;
//! the `priority` argument is recorded on the task but does not reorder the
//! queue.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::error::Result;
use crate::metrics::{
    TASKS_COMPLETED_TOTAL, TASKS_ENQUEUED_TOTAL, TASKS_FAILED_TOTAL, TASKS_RETRIED_TOTAL,
};

use super::{Task, TaskId, TaskStatus};

/// Default worker pool size for the thread queue.
pub const DEFAULT_THREAD_WORKERS: usize = 3;

/// Re-invocable synchronous unit of work.
type BlockingTaskFn = Arc<dyn Fn() -> Result<serde_json::Value> + Send + Sync>;

struct TaskEntry {
    task: Task,
    work: BlockingTaskFn,
}

struct Inner {
    ready: Mutex<VecDeque<TaskId>>,
    available: Condvar,
    tasks: Mutex<HashMap<TaskId, TaskEntry>>,
    running: AtomicBool,
    poll_interval: Duration,
}

impl Inner {
    fn ready_guard(&self) -> MutexGuard<'_, VecDeque<TaskId>> {
        match self.ready.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn tasks_guard(&self) -> MutexGuard<'_, HashMap<TaskId, TaskEntry>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn push_ready(&self, task_id: TaskId) {
        self.ready_guard().push_back(task_id);
        self.available.notify_one();
    }
}

/// FIFO task queue backed by OS threads.
pub struct ThreadPoolQueue {
    inner: Arc<Inner>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    max_workers: usize,
}

impl ThreadPoolQueue {
    /// Create a stopped queue with a 1s worker poll interval.
    pub fn new(max_workers: usize) -> Self {
        Self::with_poll_interval(max_workers, Duration::from_secs(1))
    }

    /// Create a stopped queue with a custom worker poll interval.
    pub fn with_poll_interval(max_workers: usize, poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                ready: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
                tasks: Mutex::new(HashMap::new()),
                running: AtomicBool::new(false),
                poll_interval,
            }),
            workers: Mutex::new(Vec::new()),
            max_workers: max_workers.max(1),
        }
    }

    /// Spawn the worker threads. Idempotent.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut workers = match self.workers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for worker_id in 0..self.max_workers {
            let inner = self.inner.clone();
            let builder = thread::Builder::new().name(format!("queue-worker-{worker_id}"));
            match builder.spawn(move || worker_loop(inner, worker_id)) {
                Ok(handle) => workers.push(handle),
                Err(e) => tracing::error!(worker_id, error = %e, "Failed to spawn worker thread"),
            }
        }

        tracing::info!(workers = self.max_workers, "Thread pool queue started");
    }

    /// Signal workers to exit and join them all. Idempotent.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.inner.available.notify_all();

        let handles: Vec<thread::JoinHandle<()>> = {
            let mut workers = match self.workers.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            workers.drain(..).collect()
        };
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("Worker thread panicked during shutdown");
            }
        }

        tracing::info!("Thread pool queue stopped");
    }

    /// Register a unit of work and make it ready.
    pub fn enqueue<F>(&self, work: F, priority: i32, max_retries: u32) -> TaskId
    where
        F: Fn() -> Result<serde_json::Value> + Send + Sync + 'static,
    {
        let task_id = Uuid::new_v4();
        self.inner.tasks_guard().insert(
            task_id,
            TaskEntry {
                task: Task::new(task_id, priority, max_retries),
                work: Arc::new(work),
            },
        );
        self.inner.push_ready(task_id);
        TASKS_ENQUEUED_TOTAL.inc();

        tracing::debug!(%task_id, "Task enqueued on thread pool");
        task_id
    }

    /// Read-only snapshot of a task.
    pub fn get_task(&self, task_id: TaskId) -> Option<Task> {
        self.inner
            .tasks_guard()
            .get(&task_id)
            .map(|entry| entry.task.clone())
    }

    /// Tasks currently waiting in the ready queue.
    pub fn depth(&self) -> usize {
        self.inner.ready_guard().len()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }
}

fn worker_loop(inner: Arc<Inner>, worker_id: usize) {
    tracing::debug!(worker_id, "Worker thread started");

    while inner.running.load(Ordering::SeqCst) {
        let task_id = {
            let mut ready = inner.ready_guard();
            match ready.pop_front() {
                Some(id) => Some(id),
                None => {
                    let wait = inner.available.wait_timeout(ready, inner.poll_interval);
                    let (mut ready, _) = match wait {
                        Ok(pair) => pair,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    ready.pop_front()
                }
            }
        };

        let Some(task_id) = task_id else {
            continue;
        };
        run_task(&inner, task_id, worker_id);
    }

    tracing::debug!(worker_id, "Worker thread stopped");
}

fn run_task(inner: &Inner, task_id: TaskId, worker_id: usize) {
    let work = {
        let mut tasks = inner.tasks_guard();
        let Some(entry) = tasks.get_mut(&task_id) else {
            tracing::debug!(worker_id, %task_id, "Task no longer tracked, skipping");
            return;
        };
        entry.task.status = TaskStatus::Running;
        entry.task.started_at = Some(Utc::now());
        entry.work.clone()
    };

    tracing::debug!(worker_id, %task_id, "Task started");

    match work() {
        Ok(value) => {
            let mut tasks = inner.tasks_guard();
            if let Some(entry) = tasks.get_mut(&task_id) {
                entry.task.result = Some(value);
                entry.task.status = TaskStatus::Completed;
                entry.task.completed_at = Some(Utc::now());
            }
            TASKS_COMPLETED_TOTAL.inc();
            tracing::debug!(worker_id, %task_id, "Task completed");
        }
        Err(e) => {
            let retry = {
                let mut tasks = inner.tasks_guard();
                let Some(entry) = tasks.get_mut(&task_id) else {
                    return;
                };
                entry.task.error = Some(e.to_string());
                if entry.task.retry_count < entry.task.max_retries {
                    entry.task.retry_count += 1;
                    entry.task.status = TaskStatus::Retrying;
                    Some((entry.task.retry_count, entry.task.max_retries))
                } else {
                    entry.task.status = TaskStatus::Failed;
                    entry.task.completed_at = Some(Utc::now());
                    None
                }
            };

            match retry {
                Some((retry_count, max_retries)) => {
                    inner.push_ready(task_id);
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
