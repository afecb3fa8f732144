use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub notifier: NotifierSettings,
    #[serde(default)]
    pub channels: ChannelSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    /// Worker pool size of the async priority queue
    #[serde(default = "default_async_workers")]
    pub async_workers: usize,
    /// Worker pool size of the thread-backed queue
    #[serde(default = "default_thread_workers")]
    pub thread_workers: usize,
    /// Bounded worker wait between stop-signal checks, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_async_workers() -> usize {
    5
}

fn default_thread_workers() -> usize {
    3
}

fn default_poll_interval_ms() -> u64 {
    1000 // 1 second
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifierSettings {
    /// Consecutive failures before the circuit opens
    #[serde(default = "default_circuit_max_failures")]
    pub circuit_max_failures: u32,
    /// Circuit cooldown window in milliseconds
    #[serde(default = "default_circuit_cooldown_ms")]
    pub circuit_cooldown_ms: u64,
    /// Whether per-delivery timing samples go to the metrics sink
    #[serde(default = "default_performance_tracking")]
    pub performance_tracking: bool,
}

fn default_circuit_max_failures() -> u32 {
    5
}

fn default_circuit_cooldown_ms() -> u64 {
    60_000 // 1 minute
}

fn default_performance_tracking() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSettings {
    /// Simulated transport fault probability, 0.0 to 1.0
    #[serde(default = "default_failure_probability")]
    pub failure_probability: f64,
    /// Immediate attempts per channel send
    #[serde(default = "default_send_attempts")]
    pub send_attempts: u32,
}

fn default_failure_probability() -> f64 {
    0.1
}

fn default_send_attempts() -> u32 {
    3
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("queue.async_workers", 5)?
            .set_default("queue.thread_workers", 3)?
            .set_default("queue.poll_interval_ms", 1000)?
            .set_default("notifier.circuit_max_failures", 5)?
            .set_default("notifier.circuit_cooldown_ms", 60_000)?
            .set_default("channels.failure_probability", 0.1)?
            .set_default("channels.send_attempts", 3)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // QUEUE_ASYNC_WORKERS, NOTIFIER_CIRCUIT_MAX_FAILURES, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Worker poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue.poll_interval_ms)
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            async_workers: default_async_workers(),
            thread_workers: default_thread_workers(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            circuit_max_failures: default_circuit_max_failures(),
            circuit_cooldown_ms: default_circuit_cooldown_ms(),
            performance_tracking: default_performance_tracking(),
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            failure_probability: default_failure_probability(),
            send_attempts: default_send_attempts(),
        }
    }
}
