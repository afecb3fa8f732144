//! Cross-component integration tests
//!
//! These tests verify interactions between the queue, notifier, circuit
//! breaker, and storage collaborators without any external services: the
//! simulated channel senders run with a fault probability of 0.0 or 1.0 so
//! every scenario is deterministic.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use beacon_dispatcher::breaker::{CircuitBreaker, CircuitBreakerConfig};
use beacon_dispatcher::channel::ChannelSet;
use beacon_dispatcher::dispatch::{NotificationDispatcher, NotificationRequest};
use beacon_dispatcher::error::{DispatchError, Result};
use beacon_dispatcher::notifier::{NotificationResult, Notifier};
use beacon_dispatcher::queue::{AsyncTaskQueue, TaskId, TaskStatus, ThreadPoolQueue};
use beacon_dispatcher::routing::EmergencyType;
use beacon_dispatcher::store::{
    MemoryMetricsSink, MemoryNotificationStore, MemoryUserStore, NewNotification,
    NotificationStore, UserRecord,
};
use uuid::Uuid;

/// Create a full test environment with deterministic channel senders.
fn create_test_environment(failure_probability: f64) -> TestEnvironment {
    let users = Arc::new(MemoryUserStore::new());
    users.insert(
        UserRecord::new(
            "u-1001",
            "Ada Moreau",
            "ada.moreau@example.edu",
            Some("+33612345678".to_string()),
            true,
        )
        .expect("valid user"),
    );
    users.insert(
        UserRecord::new("u-1002", "Noah Petit", "noah.petit@example.edu", None, false)
            .expect("valid user"),
    );

    let notifications = Arc::new(MemoryNotificationStore::new());
    let perf = Arc::new(MemoryMetricsSink::new());

    let notifier = Arc::new(
        Notifier::new(
            ChannelSet::simulated(failure_probability, 3),
            CircuitBreaker::new(),
            notifications.clone(),
        )
        .with_metrics(perf.clone()),
    );

    let queue = Arc::new(AsyncTaskQueue::with_poll_interval(
        2,
        Duration::from_millis(20),
    ));
    let dispatcher =
        NotificationDispatcher::new(queue.clone(), notifier.clone(), users.clone());

    TestEnvironment {
        dispatcher,
        queue,
        users,
        notifications,
        perf,
        notifier,
    }
}

struct TestEnvironment {
    dispatcher: NotificationDispatcher,
    queue: Arc<AsyncTaskQueue>,
    #[allow(dead_code)]
    users: Arc<MemoryUserStore>,
    notifications: Arc<MemoryNotificationStore>,
    perf: Arc<MemoryMetricsSink>,
    notifier: Arc<Notifier>,
}

async fn wait_terminal(queue: &AsyncTaskQueue, task_id: TaskId) -> beacon_dispatcher::queue::Task {
    for _ in 0..500 {
        if let Some(task) = queue.get_task(task_id) {
            if task.status.is_terminal() {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} did not reach a terminal state");
}

// =============================================================================
// End-to-end dispatch
// =============================================================================

#[tokio::test]
async fn test_security_notification_end_to_end() {
    let env = create_test_environment(0.0);
    env.dispatcher.start().await;

    let task_id = env
        .dispatcher
        .enqueue_notification(NotificationRequest::new(
            "u-1001",
            "Campus lockdown",
            "Shelter in place",
            "security",
        ))
        .expect("request accepted");

    let task = wait_terminal(&env.queue, task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.retry_count, 0);

    // The task result is the serialized NotificationResult with all three
    // channel outcomes (the user has a phone number).
    let result: NotificationResult =
        serde_json::from_value(task.result.expect("result recorded")).expect("valid result");
    assert_eq!(result.outcomes.len(), 3);
    assert_eq!(result.emergency_type, EmergencyType::Security);

    let record = env
        .notifications
        .get(result.notification_id.expect("archived"))
        .expect("record exists");
    assert_eq!(record.channels, "Email,Push,SMS");
    assert_eq!(record.priority, "CRITICAL");

    // Performance tracking captured one sample per channel send, and the
    // successful notify kept the circuit closed.
    assert_eq!(env.perf.snapshot().len(), 3);
    assert_eq!(env.notifier.breaker().failure_count(), 0);

    env.dispatcher.stop().await;
}

#[tokio::test]
async fn test_non_critical_uses_push_for_non_email_user() {
    let env = create_test_environment(0.0);
    env.dispatcher.start().await;

    let task_id = env
        .dispatcher
        .enqueue_notification(NotificationRequest::new(
            "u-1002",
            "Storm warning",
            "Classes move online",
            "weather",
        ))
        .expect("request accepted");

    let task = wait_terminal(&env.queue, task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);

    let result: NotificationResult =
        serde_json::from_value(task.result.expect("result recorded")).expect("valid result");
    assert_eq!(result.outcomes.len(), 1);
    let record = env
        .notifications
        .get(result.notification_id.expect("archived"))
        .expect("record exists");
    assert_eq!(record.channels, "Push");
    assert_eq!(record.priority, "HIGH");

    env.dispatcher.stop().await;
}

#[tokio::test]
async fn test_unknown_user_exhausts_retries() {
    let env = create_test_environment(0.0);
    env.dispatcher.start().await;

    let task_id = env
        .dispatcher
        .enqueue_notification(NotificationRequest::new(
            "u-missing",
            "Hello",
            "World",
            "academic",
        ))
        .expect("request accepted");

    let task = wait_terminal(&env.queue, task_id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, task.max_retries);
    assert!(task
        .error
        .as_deref()
        .is_some_and(|e| e.contains("User not found")));
    assert!(env.notifications.is_empty());

    env.dispatcher.stop().await;
}

// =============================================================================
// Queue ordering and retry accounting
// =============================================================================

#[tokio::test]
async fn test_higher_priority_runs_first_on_single_worker() {
    let queue = AsyncTaskQueue::with_poll_interval(1, Duration::from_millis(20));
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    // Enqueue the low-priority task first, while no worker is running, so
    // only the heap decides who goes first.
    let order_low = order.clone();
    let low = queue.enqueue(
        move || {
            let order = order_low.clone();
            async move {
                order.lock().expect("order lock").push("low");
                Ok(json!(null))
            }
        },
        0,
        3,
    );
    let order_high = order.clone();
    let high = queue.enqueue(
        move || {
            let order = order_high.clone();
            async move {
                order.lock().expect("order lock").push("high");
                Ok(json!(null))
            }
        },
        2,
        3,
    );

    queue.start().await;
    wait_terminal(&queue, low).await;
    wait_terminal(&queue, high).await;
    queue.stop().await;

    assert_eq!(*order.lock().expect("order lock"), vec!["high", "low"]);
}

#[tokio::test]
async fn test_equal_priority_is_fifo() {
    let queue = AsyncTaskQueue::with_poll_interval(1, Duration::from_millis(20));
    let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

    let ids: Vec<TaskId> = (0..4)
        .map(|i| {
            let order = order.clone();
            queue.enqueue(
                move || {
                    let order = order.clone();
                    async move {
                        order.lock().expect("order lock").push(i);
                        Ok(json!(null))
                    }
                },
                1,
                3,
            )
        })
        .collect();

    queue.start().await;
    for id in ids {
        wait_terminal(&queue, id).await;
    }
    queue.stop().await;

    assert_eq!(*order.lock().expect("order lock"), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_always_failing_task_runs_max_retries_plus_one_times() {
    let queue = AsyncTaskQueue::with_poll_interval(1, Duration::from_millis(20));
    queue.start().await;

    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let task_id = queue.enqueue(
        move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DispatchError::Archive("always fails".to_string()))
            }
        },
        0,
        2,
    );

    let task = wait_terminal(&queue, task_id).await;
    queue.stop().await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 2);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(task.completed_at.is_some());
}

#[tokio::test]
async fn test_snapshot_is_unchanged_without_worker_action() {
    let queue = AsyncTaskQueue::new(1);
    let task_id = queue.enqueue(|| async { Ok(json!(null)) }, 0, 3);

    let first = queue.get_task(task_id).expect("tracked");
    tokio::time::sleep(Duration::from_millis(30)).await;
    let second = queue.get_task(task_id).expect("tracked");

    assert_eq!(first, second);
    assert_eq!(first.status, TaskStatus::Pending);
}

// =============================================================================
// Circuit breaker behavior
// =============================================================================

#[tokio::test]
async fn test_circuit_rejects_after_threshold_failures() {
    let store = Arc::new(MemoryNotificationStore::new());
    let notifier = Notifier::new(
        ChannelSet::simulated(1.0, 3),
        CircuitBreaker::with_config(CircuitBreakerConfig {
            max_failures: 5,
            cooldown_ms: 60_000,
        }),
        store,
    );
    let user = UserRecord::new("u-1", "X", "x@example.com", None, true).expect("valid user");

    // Five consecutive delivery failures bring the count to the threshold.
    for _ in 0..5 {
        let err = notifier
            .notify(&user, "T", "B", EmergencyType::Academic)
            .await
            .expect_err("delivery fails");
        assert!(matches!(err, DispatchError::Delivery { .. }));
    }
    assert!(notifier.breaker().is_open());

    // The next call is rejected without touching the channels.
    let err = notifier
        .notify(&user, "T", "B", EmergencyType::Academic)
        .await
        .expect_err("circuit rejects");
    assert!(matches!(err, DispatchError::CircuitOpen { failures: 5 }));
}

#[tokio::test]
async fn test_circuit_recovers_after_cooldown() {
    let store = Arc::new(MemoryNotificationStore::new());
    let notifier = Notifier::new(
        ChannelSet::simulated(1.0, 3),
        CircuitBreaker::with_config(CircuitBreakerConfig {
            max_failures: 1,
            cooldown_ms: 50,
        }),
        store,
    );
    let user = UserRecord::new("u-1", "X", "x@example.com", None, true).expect("valid user");

    let _ = notifier.notify(&user, "T", "B", EmergencyType::Academic).await;
    assert!(notifier.breaker().is_open());

    tokio::time::sleep(Duration::from_millis(60)).await;
    // No explicit reset: the cooldown alone closes the circuit.
    assert!(!notifier.breaker().is_open());
    assert_eq!(notifier.breaker().failure_count(), 0);
}

#[tokio::test]
async fn test_circuit_open_counts_toward_task_retries() {
    // Breaker is pre-opened, so every queued attempt fails fast with
    // CircuitOpen and burns through the task's retry budget.
    let users = Arc::new(MemoryUserStore::new());
    users.insert(UserRecord::new("u-1", "X", "x@example.com", None, true).expect("valid user"));
    let breaker = CircuitBreaker::with_config(CircuitBreakerConfig {
        max_failures: 1,
        cooldown_ms: 600_000,
    });
    breaker.record_failure();
    let notifier = Arc::new(Notifier::new(
        ChannelSet::simulated(0.0, 3),
        breaker,
        Arc::new(MemoryNotificationStore::new()),
    ));
    let queue = Arc::new(AsyncTaskQueue::with_poll_interval(1, Duration::from_millis(20)));
    let dispatcher = NotificationDispatcher::new(queue.clone(), notifier, users);
    dispatcher.start().await;

    let task_id = dispatcher
        .enqueue_notification(NotificationRequest::new("u-1", "T", "B", "academic"))
        .expect("request accepted");

    let task = wait_terminal(&queue, task_id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.as_deref().is_some_and(|e| e.contains("Circuit open")));

    dispatcher.stop().await;
}

// =============================================================================
// Archiving failures
// =============================================================================

struct FailingNotificationStore;

#[async_trait]
impl NotificationStore for FailingNotificationStore {
    async fn create(&self, _notification: NewNotification) -> Result<Uuid> {
        Err(DispatchError::Archive("notification store offline".to_string()))
    }
}

#[tokio::test]
async fn test_archive_failure_fails_the_task() {
    let users = Arc::new(MemoryUserStore::new());
    users.insert(UserRecord::new("u-1", "X", "x@example.com", None, true).expect("valid user"));
    let notifier = Arc::new(Notifier::new(
        ChannelSet::simulated(0.0, 3),
        CircuitBreaker::new(),
        Arc::new(FailingNotificationStore),
    ));
    let queue = Arc::new(AsyncTaskQueue::with_poll_interval(1, Duration::from_millis(20)));
    let dispatcher = NotificationDispatcher::new(queue.clone(), notifier.clone(), users);
    dispatcher.start().await;

    let task_id = dispatcher
        .enqueue_notification(NotificationRequest::new("u-1", "T", "B", "academic"))
        .expect("request accepted");

    let task = wait_terminal(&queue, task_id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, task.max_retries);
    assert!(task.error.as_deref().is_some_and(|e| e.contains("Archive error")));
    // Archiving failures count as notify failures on the breaker.
    assert!(notifier.breaker().failure_count() > 0);

    dispatcher.stop().await;
}

// =============================================================================
// Thread pool queue variant
// =============================================================================

#[test]
fn test_thread_pool_queue_end_to_end() {
    let queue = ThreadPoolQueue::with_poll_interval(3, Duration::from_millis(20));
    queue.start();

    let task_id = queue.enqueue(|| Ok(json!({"delivered": true})), 0, 3);

    let mut task = None;
    for _ in 0..300 {
        if let Some(snapshot) = queue.get_task(task_id) {
            if snapshot.status.is_terminal() {
                task = Some(snapshot);
                break;
            }
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    queue.stop();

    let task = task.expect("task finished");
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result, Some(json!({"delivered": true})));
}
