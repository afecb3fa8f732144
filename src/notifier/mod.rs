//! Notification delivery orchestration.
//!
//! The [`Notifier`] runs one notify operation end to end: circuit check,
//! priority and channel resolution, delivery, archiving, breaker accounting.
//! It is built from explicit parts (channel set, breaker, stores) and is
//! shared by every worker of one queue.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::breaker::CircuitBreaker;
use crate::channel::{ChannelKind, ChannelSet, DeliveryOutcome};
use crate::error::{DispatchError, Result};
use crate::metrics::{CIRCUIT_REJECTIONS_TOTAL, DELIVERY_DURATION_SECONDS, NOTIFICATIONS_ARCHIVED_TOTAL};
use crate::routing::{self, EmergencyType, Priority};
use crate::store::{MetricsSink, NewNotification, NotificationStore, UserRecord};

/// Result of one successful notify operation.
///
/// For critical notifications the outcome list may be partial: channels that
/// failed after their own retries are logged and skipped, and only the
/// successes appear here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationResult {
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub emergency_type: EmergencyType,
    pub priority: Priority,
    pub outcomes: Vec<DeliveryOutcome>,
    /// Id assigned by the notification store on archive.
    pub notification_id: Option<Uuid>,
}

/// Executes the full notify-one-user operation.
pub struct Notifier {
    channels: ChannelSet,
    breaker: CircuitBreaker,
    store: Arc<dyn NotificationStore>,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl Notifier {
    pub fn new(
        channels: ChannelSet,
        breaker: CircuitBreaker,
        store: Arc<dyn NotificationStore>,
    ) -> Self {
        Self {
            channels,
            breaker,
            store,
            metrics: None,
        }
    }

    /// Attach a sink receiving one timing sample per delivery.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Notify one user through the channels its priority calls for.
    ///
    /// Rejected immediately with [`DispatchError::CircuitOpen`] while the
    /// breaker is open; otherwise every failure is recorded on the breaker
    /// and every success closes it.
    #[tracing::instrument(
        name = "notifier.notify",
        skip(self, user, title, body),
        fields(user_id = %user.id, emergency = %emergency)
    )]
    pub async fn notify(
        &self,
        user: &UserRecord,
        title: &str,
        body: &str,
        emergency: EmergencyType,
    ) -> Result<NotificationResult> {
        if self.breaker.is_open() {
            CIRCUIT_REJECTIONS_TOTAL.inc();
            let failures = self.breaker.failure_count();
            tracing::warn!(failures = failures, "Notify rejected, circuit is open");
            return Err(DispatchError::CircuitOpen { failures });
        }

        match self.deliver(user, title, body, emergency).await {
            Ok(result) => {
                self.breaker.record_success();
                Ok(result)
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(e)
            }
        }
    }

    async fn deliver(
        &self,
        user: &UserRecord,
        title: &str,
        body: &str,
        emergency: EmergencyType,
    ) -> Result<NotificationResult> {
        let priority = routing::priority_for(emergency);
        let message = routing::format_message(title, body, Some(emergency));
        let kinds = routing::channels_for(priority, user);

        let mut outcomes = Vec::with_capacity(kinds.len());
        if priority == Priority::Critical {
            // Channels are independent: collect whichever succeed.
            for kind in kinds {
                match self.send_timed(kind, &message, user).await {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => {
                        tracing::warn!(
                            channel = %kind,
                            error = %e,
                            "Channel failed during critical fan-out"
                        );
                    }
                }
            }
            if outcomes.is_empty() {
                tracing::warn!(user_id = %user.id, "No channel succeeded for critical notification");
            }
        } else {
            let kind = kinds[0];
            outcomes.push(self.send_timed(kind, &message, user).await?);
        }

        let channels_used = outcomes
            .iter()
            .map(|o| o.channel.display_name())
            .collect::<Vec<_>>()
            .join(",");

        let notification_id = self
            .store
            .create(NewNotification {
                user_id: user.id.clone(),
                title: title.to_string(),
                body: body.to_string(),
                emergency_type: emergency.as_str().to_string(),
                priority: priority.as_str().to_string(),
                channels: channels_used,
                status: "sent".to_string(),
            })
            .await?;
        NOTIFICATIONS_ARCHIVED_TOTAL.inc();

        tracing::info!(
            notification_id = %notification_id,
            priority = %priority,
            delivered = outcomes.len(),
            "Notification delivered and archived"
        );

        Ok(NotificationResult {
            user_id: user.id.clone(),
            title: title.to_string(),
            body: body.to_string(),
            emergency_type: emergency,
            priority,
            outcomes,
            notification_id: Some(notification_id),
        })
    }

    /// One channel delivery with latency accounting.
    async fn send_timed(
        &self,
        kind: ChannelKind,
        message: &str,
        user: &UserRecord,
    ) -> Result<DeliveryOutcome> {
        let recipient = match kind {
            ChannelKind::Email => user.email.clone(),
            ChannelKind::Sms => user.phone.clone().unwrap_or_default(),
            ChannelKind::Push => user.id.clone(),
        };

        let start = Instant::now();
        let result = self.channels.send_with_retry(kind, message, &recipient).await;
        let elapsed = start.elapsed();

        DELIVERY_DURATION_SECONDS
            .with_label_values(&[kind.as_str()])
            .observe(elapsed.as_secs_f64());
        if let Some(ref sink) = self.metrics {
            sink.record(method_name(kind), elapsed, Utc::now());
        }

        result
    }
}

fn method_name(kind: ChannelKind) -> &'static str {
    match kind {
        ChannelKind::Email => "send_email",
        ChannelKind::Sms => "send_sms",
        ChannelKind::Push => "send_push",
    }
}
