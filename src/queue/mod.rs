//! Task queues: lifecycle model, retry bookkeeping, and the two backends.
//!
//! Both queues share the [`Task`] model and the same worker semantics (poll
//! with a bounded wait, mark running, invoke, retry on failure up to the
//! task's budget, never let an error escape the worker loop). They differ in
//! execution substrate and ordering:
//!
//! - [`AsyncTaskQueue`]: tokio workers over a priority heap, stable FIFO
//!   among equal priorities.
//! - [`ThreadPoolQueue`]: OS threads over a plain FIFO queue.

mod async_queue;
mod task;
mod thread_queue;

pub use async_queue::{AsyncTaskQueue, TaskFuture, DEFAULT_ASYNC_WORKERS, DEFAULT_POLL_INTERVAL};
pub use task::{Task, TaskId, TaskStatus, DEFAULT_MAX_RETRIES};
pub use thread_queue::{ThreadPoolQueue, DEFAULT_THREAD_WORKERS};
