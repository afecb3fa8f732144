//! Service-level entry point for queued notifications.
//!
//! The [`NotificationDispatcher`] is what the embedding application calls:
//! it validates the request, derives the queue priority from the emergency
//! tag, and enqueues the notify operation as a unit of work. Callers observe
//! progress by polling [`task_status`](NotificationDispatcher::task_status).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};
use crate::notifier::Notifier;
use crate::queue::{AsyncTaskQueue, Task, TaskId, DEFAULT_MAX_RETRIES};
use crate::routing::{self, EmergencyType};
use crate::store::UserStore;

/// A request to notify one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub user_id: String,
    pub title: String,
    pub body: String,
    /// Emergency tag; unrecognized or empty tags resolve to academic.
    #[serde(default)]
    pub emergency_type: String,
}

impl NotificationRequest {
    pub fn new(
        user_id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        emergency_type: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            title: title.into(),
            body: body.into(),
            emergency_type: emergency_type.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(DispatchError::Validation("user_id must not be empty".to_string()));
        }
        if self.title.trim().is_empty() {
            return Err(DispatchError::Validation("title must not be empty".to_string()));
        }
        if self.body.trim().is_empty() {
            return Err(DispatchError::Validation("body must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Front door tying user lookup, the notifier, and the async queue together.
pub struct NotificationDispatcher {
    queue: Arc<AsyncTaskQueue>,
    notifier: Arc<Notifier>,
    users: Arc<dyn UserStore>,
}

impl NotificationDispatcher {
    pub fn new(
        queue: Arc<AsyncTaskQueue>,
        notifier: Arc<Notifier>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            queue,
            notifier,
            users,
        }
    }

    pub async fn start(&self) {
        self.queue.start().await;
    }

    pub async fn stop(&self) {
        self.queue.stop().await;
    }

    /// Validate and queue a notification; returns the task id immediately.
    ///
    /// Queue priority is the weight of the priority resolved from the
    /// emergency tag, so critical notifications are served first.
    #[tracing::instrument(
        name = "dispatcher.enqueue_notification",
        skip(self, request),
        fields(user_id = %request.user_id, emergency = %request.emergency_type)
    )]
    pub fn enqueue_notification(&self, request: NotificationRequest) -> Result<TaskId> {
        request.validate()?;

        let emergency = EmergencyType::from_tag(&request.emergency_type);
        let priority = routing::priority_for(emergency);
        let notifier = self.notifier.clone();
        let users = self.users.clone();

        let task_id = self.queue.enqueue(
            move || {
                let notifier = notifier.clone();
                let users = users.clone();
                let request = request.clone();
                async move {
                    let user = users
                        .find_by_id(&request.user_id)
                        .await?
                        .ok_or_else(|| DispatchError::UserNotFound(request.user_id.clone()))?;
                    let result = notifier
                        .notify(&user, &request.title, &request.body, emergency)
                        .await?;
                    // NotificationResult always serializes; Null is the
                    // unreachable fallback.
                    Ok(serde_json::to_value(&result).unwrap_or(serde_json::Value::Null))
                }
            },
            i32::from(priority.as_weight()),
            DEFAULT_MAX_RETRIES,
        );

        tracing::info!(%task_id, priority = %priority, "Notification queued");
        Ok(task_id)
    }

    /// Snapshot of a queued notification task.
    pub fn task_status(&self, task_id: TaskId) -> Option<Task> {
        self.queue.get_task(task_id)
    }
}
