//! Simulated channel transports.
//!
//! Each sender stands in for a real gateway and fails a configurable
//! fraction of attempts, which exercises the retry paths end to end. A
//! probability of 0.0 makes a sender deterministic for tests; injecting a
//! real transport means implementing [`ChannelSender`] instead.

use async_trait::async_trait;
use rand::Rng;

use super::{ChannelKind, ChannelSender, DeliveryOutcome, DeliveryStatus};
use crate::error::{DispatchError, Result};

fn simulate_fault(probability: f64) -> bool {
    probability > 0.0 && rand::rng().random_bool(probability.clamp(0.0, 1.0))
}

fn outcome(kind: ChannelKind, message: &str, recipient: &str) -> DeliveryOutcome {
    DeliveryOutcome {
        channel: kind,
        status: DeliveryStatus::Success,
        recipient: recipient.to_string(),
        message: message.to_string(),
    }
}

/// Simulated email gateway. Recipient is an email address.
pub struct EmailSender {
    failure_probability: f64,
}

impl EmailSender {
    pub fn new(failure_probability: f64) -> Self {
        Self { failure_probability }
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, message: &str, recipient: &str) -> Result<DeliveryOutcome> {
        if simulate_fault(self.failure_probability) {
            return Err(DispatchError::Delivery {
                channel: ChannelKind::Email,
                reason: "email gateway refused the message".to_string(),
            });
        }
        tracing::debug!(recipient = %recipient, "Email sent");
        Ok(outcome(ChannelKind::Email, message, recipient))
    }
}

/// Simulated SMS gateway. Recipient is a phone number.
pub struct SmsSender {
    failure_probability: f64,
}

impl SmsSender {
    pub fn new(failure_probability: f64) -> Self {
        Self { failure_probability }
    }
}

#[async_trait]
impl ChannelSender for SmsSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    async fn send(&self, message: &str, recipient: &str) -> Result<DeliveryOutcome> {
        if simulate_fault(self.failure_probability) {
            return Err(DispatchError::Delivery {
                channel: ChannelKind::Sms,
                reason: "sms gateway refused the message".to_string(),
            });
        }
        tracing::debug!(recipient = %recipient, "SMS sent");
        Ok(outcome(ChannelKind::Sms, message, recipient))
    }
}

/// Simulated push provider. Recipient is a user id.
pub struct PushSender {
    failure_probability: f64,
}

impl PushSender {
    pub fn new(failure_probability: f64) -> Self {
        Self { failure_probability }
    }
}

#[async_trait]
impl ChannelSender for PushSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Push
    }

    async fn send(&self, message: &str, recipient: &str) -> Result<DeliveryOutcome> {
        if simulate_fault(self.failure_probability) {
            return Err(DispatchError::Delivery {
                channel: ChannelKind::Push,
                reason: "push provider refused the message".to_string(),
            });
        }
        tracing::debug!(recipient = %recipient, "Push notification sent");
        Ok(outcome(ChannelKind::Push, message, recipient))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zero_probability_always_succeeds() {
        let sender = EmailSender::new(0.0);
        for _ in 0..20 {
            let outcome = sender.send("hi", "a@example.com").await.expect("no faults");
            assert_eq!(outcome.status, DeliveryStatus::Success);
        }
    }

    #[tokio::test]
    async fn test_certain_probability_always_fails() {
        let sender = PushSender::new(1.0);
        for _ in 0..20 {
            assert!(sender.send("hi", "user-1").await.is_err());
        }
    }

    #[test]
    fn test_probability_is_clamped() {
        // Out-of-range input must not panic in random_bool.
        assert!(simulate_fault(2.0));
        assert!(!simulate_fault(-1.0));
    }
}
