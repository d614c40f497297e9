//! # Observability & Tracing
//!
//! [`setup_tracing`] initializes structured logging for the whole panel.
//!
//! ```bash
//! RUST_LOG=info cargo run      # state transitions: deleted, restored, committed
//! RUST_LOG=debug cargo run     # plus request payloads and store dispatches
//! ```
//!
//! The format is compact and hides module paths; log lines carry structured
//! fields (`resource`, `batch_id`, `table`, `count`) instead.

/// Installs the global subscriber. Call once, at startup.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}
