//! Delivery channels.
//!
//! A [`ChannelSender`] performs a single delivery attempt on one channel.
//! Senders are composed into a [`ChannelSet`], an explicit kind-to-sender
//! map injected into the notifier, which also owns the channel-level retry:
//! up to [`DEFAULT_SEND_ATTEMPTS`] immediate attempts, no backoff, before the
//! failure propagates. This retry is independent of the task-queue retry.

mod simulated;

pub use simulated::{EmailSender, PushSender, SmsSender};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};
use crate::metrics::DELIVERIES_TOTAL;

/// Immediate attempts per send before the failure propagates.
pub const DEFAULT_SEND_ATTEMPTS: u32 = 3;

/// A delivery mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email,
    Sms,
    Push,
}

impl ChannelKind {
    /// Lowercase identifier, used as a metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Sms => "sms",
            ChannelKind::Push => "push",
        }
    }

    /// Human-readable channel name, as recorded on archived notifications.
    pub fn display_name(&self) -> &'static str {
        match self {
            ChannelKind::Email => "Email",
            ChannelKind::Sms => "SMS",
            ChannelKind::Push => "Push",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Outcome of one successful delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub channel: ChannelKind,
    pub status: DeliveryStatus,
    pub recipient: String,
    pub message: String,
}

/// Delivery status recorded on an outcome. Failed attempts surface as
/// [`DispatchError::Delivery`] instead of an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Success,
}

/// One delivery attempt on one channel.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// The channel this sender serves.
    fn kind(&self) -> ChannelKind;

    /// Perform a single delivery attempt. No internal retry.
    async fn send(&self, message: &str, recipient: &str) -> Result<DeliveryOutcome>;
}

/// Registry of channel senders, keyed by kind.
///
/// Replaces implicit capability mixins with explicit injection: the notifier
/// can only reach channels that were registered here.
pub struct ChannelSet {
    senders: HashMap<ChannelKind, Arc<dyn ChannelSender>>,
    send_attempts: u32,
}

impl ChannelSet {
    /// Create an empty set with the given per-send attempt budget.
    pub fn new(send_attempts: u32) -> Self {
        Self {
            senders: HashMap::new(),
            send_attempts: send_attempts.max(1),
        }
    }

    /// Register a sender under its own kind, replacing any previous one.
    pub fn with_sender(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(sender.kind(), sender);
        self
    }

    /// A full set of simulated senders sharing one failure probability.
    pub fn simulated(failure_probability: f64, send_attempts: u32) -> Self {
        Self::new(send_attempts)
            .with_sender(Arc::new(EmailSender::new(failure_probability)))
            .with_sender(Arc::new(SmsSender::new(failure_probability)))
            .with_sender(Arc::new(PushSender::new(failure_probability)))
    }

    /// Registered channel kinds.
    pub fn kinds(&self) -> Vec<ChannelKind> {
        self.senders.keys().copied().collect()
    }

    pub fn contains(&self, kind: ChannelKind) -> bool {
        self.senders.contains_key(&kind)
    }

    /// Deliver on one channel, retrying transient failures immediately.
    ///
    /// Attempts up to the configured budget with no backoff; the last error
    /// propagates once the budget is exhausted.
    pub async fn send_with_retry(
        &self,
        kind: ChannelKind,
        message: &str,
        recipient: &str,
    ) -> Result<DeliveryOutcome> {
        let sender = self.senders.get(&kind).ok_or_else(|| DispatchError::Delivery {
            channel: kind,
            reason: "no sender registered for channel".to_string(),
        })?;

        let mut attempt = 1;
        loop {
            match sender.send(message, recipient).await {
                Ok(outcome) => {
                    DELIVERIES_TOTAL
                        .with_label_values(&[kind.as_str(), "success"])
                        .inc();
                    return Ok(outcome);
                }
                Err(e) if attempt < self.send_attempts => {
                    tracing::warn!(
                        channel = %kind,
                        attempt = attempt,
                        max_attempts = self.send_attempts,
                        error = %e,
                        "Delivery attempt failed, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => {
                    DELIVERIES_TOTAL
                        .with_label_values(&[kind.as_str(), "failure"])
                        .inc();
                    tracing::warn!(
                        channel = %kind,
                        attempts = attempt,
                        error = %e,
                        "Delivery failed after exhausting attempts"
                    );
                    return Err(e);
                }
            }
        }
    }
}
