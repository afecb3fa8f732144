use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default retry budget for queued tasks.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

pub type TaskId = Uuid;

/// Status of a task in a queue.
///
/// Transitions move forward only, except for the retry cycle:
/// `Pending -> Running -> (Retrying -> Running)* -> Completed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Retrying,
}

impl TaskStatus {
    /// Whether the task has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Observable state of one queued task.
///
/// The work callable lives in the queue's registry next to this snapshot and
/// never leaves it; `get_task` hands out clones of this struct only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    /// Message of the most recent failed attempt.
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub priority: i32,
}

impl Task {
    pub(crate) fn new(id: TaskId, priority: i32, max_retries: u32) -> Self {
        Self {
            id,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            retry_count: 0,
            max_retries,
            priority,
        }
    }
}
