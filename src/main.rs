use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use beacon_dispatcher::breaker::{CircuitBreaker, CircuitBreakerConfig};
use beacon_dispatcher::channel::ChannelSet;
use beacon_dispatcher::config::Settings;
use beacon_dispatcher::dispatch::{NotificationDispatcher, NotificationRequest};
use beacon_dispatcher::notifier::Notifier;
use beacon_dispatcher::queue::AsyncTaskQueue;
use beacon_dispatcher::store::{
    MemoryMetricsSink, MemoryNotificationStore, MemoryUserStore, UserRecord,
};
use beacon_dispatcher::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    telemetry::init_tracing();

    // Load configuration
    let settings = Settings::new()?;
    tracing::info!("Configuration loaded");

    // Wire up storage collaborators
    let users = Arc::new(MemoryUserStore::new());
    users.insert(UserRecord::new(
        "u-1001",
        "Ada Moreau",
        "ada.moreau@example.edu",
        Some("+33612345678".to_string()),
        true,
    )?);
    users.insert(UserRecord::new(
        "u-1002",
        "Noah Petit",
        "noah.petit@example.edu",
        None,
        false,
    )?);
    let notifications = Arc::new(MemoryNotificationStore::new());
    let perf = Arc::new(MemoryMetricsSink::new());

    // Build the notifier
    let channels = ChannelSet::simulated(
        settings.channels.failure_probability,
        settings.channels.send_attempts,
    );
    let breaker = CircuitBreaker::with_config(CircuitBreakerConfig {
        max_failures: settings.notifier.circuit_max_failures,
        cooldown_ms: settings.notifier.circuit_cooldown_ms,
    });
    let mut notifier = Notifier::new(channels, breaker, notifications.clone());
    if settings.notifier.performance_tracking {
        notifier = notifier.with_metrics(perf.clone());
    }

    // Build the queue and dispatcher
    let queue = Arc::new(AsyncTaskQueue::with_poll_interval(
        settings.queue.async_workers,
        settings.poll_interval(),
    ));
    let dispatcher = NotificationDispatcher::new(queue, Arc::new(notifier), users);
    dispatcher.start().await;

    // Queue a few notifications across the priority spectrum
    let task_ids = vec![
        dispatcher.enqueue_notification(NotificationRequest::new(
            "u-1001",
            "Campus lockdown",
            "Shelter in place until further notice",
            "security",
        ))?,
        dispatcher.enqueue_notification(NotificationRequest::new(
            "u-1002",
            "Storm warning",
            "Classes move online after 14:00",
            "weather",
        ))?,
        dispatcher.enqueue_notification(NotificationRequest::new(
            "u-1001",
            "Library hours",
            "Extended hours during finals week",
            "academic",
        ))?,
    ];

    // Poll until every task reaches a terminal state
    for task_id in &task_ids {
        loop {
            match dispatcher.task_status(*task_id) {
                Some(task) if task.status.is_terminal() => {
                    tracing::info!(
                        %task_id,
                        status = ?task.status,
                        retries = task.retry_count,
                        "Task finished"
                    );
                    break;
                }
                _ => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
    }

    tracing::info!(
        archived = notifications.len(),
        timing_samples = perf.snapshot().len(),
        "Dispatch run complete"
    );

    dispatcher.stop().await;
    Ok(())
}
