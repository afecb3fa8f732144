//! Tracing initialization.
//!
//! Console subscriber with `RUST_LOG`-style filtering. Called once from the
//! binary entry point; libraries embedding the crate bring their own
//! subscriber.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Tracing initialized");
}
