//! Circuit breaker guarding the delivery path.
//!
//! Tracks consecutive notify failures and rejects new attempts once the
//! threshold is reached, for a cooldown window. After the cooldown elapses
//! the breaker self-resets on the next check; any successful delivery resets
//! it immediately.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
fn current_time_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub max_failures: u32,
    /// Cooldown window after the last failure (ms)
    pub cooldown_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            cooldown_ms: 60_000, // 1 minute
        }
    }
}

/// Lock-free circuit breaker shared by all workers of one notifier.
///
/// The open/closed decision is a pure function of the failure count, the
/// last failure timestamp, and the clock; the only mutations are
/// [`record_failure`](CircuitBreaker::record_failure),
/// [`record_success`](CircuitBreaker::record_success), and the cooldown
/// self-reset inside [`is_open`](CircuitBreaker::is_open).
pub struct CircuitBreaker {
    /// Consecutive failure count
    failure_count: AtomicU32,
    /// Timestamp of the last failure (ms since epoch, 0 = none)
    last_failure_ms: AtomicI64,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a circuit breaker with default configuration
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create a circuit breaker with custom configuration
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            failure_count: AtomicU32::new(0),
            last_failure_ms: AtomicI64::new(0),
            config,
        }
    }

    /// Whether delivery attempts should currently be rejected.
    ///
    /// Open iff the threshold has been reached and the cooldown since the
    /// last failure has not yet elapsed. An elapsed cooldown resets the
    /// count so the next attempt goes through.
    pub fn is_open(&self) -> bool {
        let failures = self.failure_count.load(Ordering::Acquire);
        if failures < self.config.max_failures {
            return false;
        }

        let last = self.last_failure_ms.load(Ordering::Acquire);
        if last == 0 {
            return false;
        }

        let elapsed = current_time_ms() - last;
        if elapsed < self.config.cooldown_ms as i64 {
            true
        } else {
            self.failure_count.store(0, Ordering::Release);
            self.last_failure_ms.store(0, Ordering::Release);
            tracing::info!(
                cooldown_ms = self.config.cooldown_ms,
                "Circuit cooldown elapsed, resetting failure count"
            );
            false
        }
    }

    /// Record a failed delivery.
    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        self.last_failure_ms
            .store(current_time_ms(), Ordering::Release);

        if failures == self.config.max_failures {
            tracing::warn!(
                failures = failures,
                cooldown_ms = self.config.cooldown_ms,
                "Circuit opened due to consecutive failures"
            );
        }
    }

    /// Record a successful delivery, closing the circuit immediately.
    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Release);
        self.last_failure_ms.store(0, Ordering::Release);
    }

    /// Current consecutive failure count.
    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Acquire)
    }

    /// Statistics snapshot
    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            open: self.is_open(),
            failure_count: self.failure_count.load(Ordering::Acquire),
            last_failure_ms: self.last_failure_ms.load(Ordering::Acquire),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub open: bool,
    pub failure_count: u32,
    pub last_failure_ms: i64,
}
