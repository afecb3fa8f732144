//! External storage collaborators.
//!
//! The core consumes users, archives notifications, and appends performance
//! samples through these traits and assumes nothing else about persistence.
//! The in-memory implementations back the demo binary and tests; a real
//! deployment would put its database behind the same traits.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DispatchError, Result};

/// A user as the dispatcher sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub prefers_email: bool,
}

impl UserRecord {
    /// Build a validated user record.
    ///
    /// Email must look like `local@domain.tld`; phone, when present, must be
    /// an international number (optional `+`, 2-15 digits, no leading zero).
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
        phone: Option<String>,
        prefers_email: bool,
    ) -> Result<Self> {
        let email = email.into();
        validate_email(&email)?;
        if let Some(ref phone) = phone {
            validate_phone(phone)?;
        }
        Ok(Self {
            id: id.into(),
            name: name.into(),
            email,
            phone,
            prefers_email,
        })
    }
}

fn validate_email(email: &str) -> Result<()> {
    let invalid = || DispatchError::Validation(format!("invalid email: {email}"));

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || !local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._%+-".contains(c))
    {
        return Err(invalid());
    }

    let (host, tld) = domain.rsplit_once('.').ok_or_else(invalid)?;
    if host.is_empty()
        || !host.chars().all(|c| c.is_ascii_alphanumeric() || ".-".contains(c))
        || tld.len() < 2
        || !tld.chars().all(|c| c.is_ascii_alphabetic())
    {
        return Err(invalid());
    }
    Ok(())
}

fn validate_phone(phone: &str) -> Result<()> {
    let invalid = || DispatchError::Validation(format!("invalid phone number: {phone}"));

    let digits = phone.strip_prefix('+').unwrap_or(phone);
    if digits.len() < 2 || digits.len() > 15 {
        return Err(invalid());
    }
    if !digits.chars().all(|c| c.is_ascii_digit()) || digits.starts_with('0') {
        return Err(invalid());
    }
    Ok(())
}

/// Fields of a notification to archive, before the store assigns an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub emergency_type: String,
    pub priority: String,
    /// Comma-joined names of the channels that succeeded.
    pub channels: String,
    pub status: String,
}

/// An archived notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub emergency_type: String,
    pub priority: String,
    pub channels: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Read access to users.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>>;
}

/// Archival of delivered notifications.
///
/// Expected to be transactional: an error here propagates so the enclosing
/// worker marks the task for retry instead of silently losing the record.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create(&self, notification: NewNotification) -> Result<Uuid>;
}

/// Append-only sink for per-delivery timing samples.
pub trait MetricsSink: Send + Sync {
    fn record(&self, method: &str, duration: Duration, timestamp: DateTime<Utc>);
}

/// In-memory user store.
#[derive(Default)]
pub struct MemoryUserStore {
    users: DashMap<String, UserRecord>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: UserRecord) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>> {
        Ok(self.users.get(id).map(|u| u.clone()))
    }
}

/// In-memory notification archive.
#[derive(Default)]
pub struct MemoryNotificationStore {
    records: DashMap<Uuid, NotificationRecord>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<NotificationRecord> {
        self.records.get(&id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn create(&self, notification: NewNotification) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let record = NotificationRecord {
            id,
            user_id: notification.user_id,
            title: notification.title,
            body: notification.body,
            emergency_type: notification.emergency_type,
            priority: notification.priority,
            channels: notification.channels,
            status: notification.status,
            created_at: Utc::now(),
        };
        self.records.insert(id, record);
        Ok(id)
    }
}

/// One timing sample recorded by a [`MetricsSink`].
#[derive(Debug, Clone)]
pub struct MetricSample {
    pub method: String,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
}

/// In-memory metrics sink.
#[derive(Default)]
pub struct MemoryMetricsSink {
    samples: Mutex<Vec<MetricSample>>,
}

impl MemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all recorded samples.
    pub fn snapshot(&self) -> Vec<MetricSample> {
        match self.samples.lock() {
            Ok(samples) => samples.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Mean duration of samples for one method, if any were recorded.
    pub fn average_duration(&self, method: &str) -> Option<Duration> {
        let samples = self.snapshot();
        let matching: Vec<_> = samples.iter().filter(|s| s.method == method).collect();
        if matching.is_empty() {
            return None;
        }
        let total: Duration = matching.iter().map(|s| s.duration).sum();
        Some(total / matching.len() as u32)
    }

    pub fn clear(&self) {
        match self.samples.lock() {
            Ok(mut samples) => samples.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl MetricsSink for MemoryMetricsSink {
    fn record(&self, method: &str, duration: Duration, timestamp: DateTime<Utc>) {
        let sample = MetricSample {
            method: method.to_string(),
            duration,
            timestamp,
        };
        match self.samples.lock() {
            Ok(mut samples) => samples.push(sample),
            Err(poisoned) => poisoned.into_inner().push(sample),
        }
    }
}
