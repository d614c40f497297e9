//! Runtime orchestration: starting the storage actor, wiring services to it,
//! and shutting it down.
//!
//! - [`PanelSystem`] - owns the storage actor and builds every client-side service
//!
//! Logging is set up separately, with [`panel_framework::tracing::setup_tracing`].

pub mod panel_system;

pub use panel_system::*;
