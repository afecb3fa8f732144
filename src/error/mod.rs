use thiserror::Error;

use crate::channel::ChannelKind;

/// Error taxonomy for the dispatch core.
///
/// Lower layers absorb what they can (the channel layer retries transient
/// faults, the queue converts work errors into retry bookkeeping); whatever
/// reaches a caller is one of these.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Delivery failed on {channel}: {reason}")]
    Delivery { channel: ChannelKind, reason: String },

    #[error("Circuit open after {failures} consecutive failures")]
    CircuitOpen { failures: u32 },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl DispatchError {
    /// Short machine-readable code, used in logs and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Validation(_) => "VALIDATION_ERROR",
            DispatchError::Delivery { .. } => "DELIVERY_ERROR",
            DispatchError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            DispatchError::Archive(_) => "ARCHIVE_ERROR",
            DispatchError::UserNotFound(_) => "USER_NOT_FOUND",
            DispatchError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DispatchError::Delivery {
            channel: ChannelKind::Sms,
            reason: "gateway refused the message".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Delivery failed on SMS: gateway refused the message"
        );
        assert_eq!(err.code(), "DELIVERY_ERROR");
    }

    #[test]
    fn test_circuit_open_display() {
        let err = DispatchError::CircuitOpen { failures: 5 };
        assert!(err.to_string().contains("5 consecutive failures"));
    }
}
