// Infrastructure layer (shared components)
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Domain layer (business logic)
pub mod breaker;
pub mod channel;
pub mod notifier;
pub mod queue;
pub mod routing;
pub mod store;

// Application layer
pub mod dispatch;
