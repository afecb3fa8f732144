//! Priority resolution and message formatting.
//!
//! An emergency type classifies what a notification is about; priority is
//! derived from it and drives channel fan-out: critical notifications go out
//! on every channel the user can receive, everything else uses the single
//! channel the user prefers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelKind;
use crate::store::UserRecord;

/// Subject-domain tag of a notification, used to derive priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmergencyType {
    Weather,
    Security,
    Health,
    Infrastructure,
    Academic,
}

impl EmergencyType {
    /// Lowercase tag, as stored on archived notifications.
    pub fn as_str(&self) -> &'static str {
        match self {
            EmergencyType::Weather => "weather",
            EmergencyType::Security => "security",
            EmergencyType::Health => "health",
            EmergencyType::Infrastructure => "infrastructure",
            EmergencyType::Academic => "academic",
        }
    }

    /// Lenient tag parsing: case-insensitive, unrecognized tags fall back to
    /// [`EmergencyType::Academic`].
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "weather" => EmergencyType::Weather,
            "security" => EmergencyType::Security,
            "health" => EmergencyType::Health,
            "infrastructure" => EmergencyType::Infrastructure,
            _ => EmergencyType::Academic,
        }
    }
}

impl fmt::Display for EmergencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority levels for notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Numeric weight for ordering and queue priority (higher = served first).
    pub fn as_weight(&self) -> u8 {
        match self {
            Priority::Low => 1,
            Priority::Medium => 2,
            Priority::High => 3,
            Priority::Critical => 4,
        }
    }

    /// Uppercase label, as stored on archived notifications.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
            Priority::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_weight().cmp(&other.as_weight())
    }
}

/// Map an emergency type to its priority.
pub fn priority_for(emergency: EmergencyType) -> Priority {
    match emergency {
        EmergencyType::Security | EmergencyType::Health => Priority::Critical,
        EmergencyType::Weather => Priority::High,
        EmergencyType::Infrastructure => Priority::Medium,
        EmergencyType::Academic => Priority::Low,
    }
}

/// Resolve the channel set for a priority and user.
///
/// Critical fans out to email and push, plus SMS when the user has a phone
/// number; every other priority uses exactly one channel, email if the user
/// prefers it, push otherwise.
pub fn channels_for(priority: Priority, user: &UserRecord) -> Vec<ChannelKind> {
    if priority == Priority::Critical {
        let mut channels = vec![ChannelKind::Email, ChannelKind::Push];
        if user.phone.as_deref().is_some_and(|p| !p.is_empty()) {
            channels.push(ChannelKind::Sms);
        }
        channels
    } else if user.prefers_email {
        vec![ChannelKind::Email]
    } else {
        vec![ChannelKind::Push]
    }
}

/// Combine title and body into the outbound message, with an uppercase
/// emergency tag prefix when one is present.
pub fn format_message(title: &str, body: &str, emergency: Option<EmergencyType>) -> String {
    let formatted = format!("{title}\n{body}");
    match emergency {
        Some(e) => format!("[{}] {formatted}", e.as_str().to_ascii_uppercase()),
        None => formatted,
    }
}
