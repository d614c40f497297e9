//! # Admin Panel
//!
//! > **Bulk resource mutation, filter synchronization and transactional
//! > actions for an administration panel.**
//!
//! The panel renders listings of arbitrary "resources" (rows of a table).
//! This crate is the orchestration underneath: what happens when the user
//! deletes, restores or detaches a selection, applies or clears a filter, asks
//! for metric cards, or runs a multi-step action.
//!
//! ## 🏗️ Design
//!
//! Client-side components never reach for globals. Each one is handed its
//! collaborators through the seams of [`panel_framework`]:
//!
//! - an [`HttpTransport`](panel_framework::HttpTransport) for requests,
//! - a [`StateStore`](panel_framework::StateStore) for view state,
//! - an [`EventBus`](panel_framework::EventBus) for lifecycle announcements.
//!
//! The server half, [`server::LocalApi`], implements the same transport seam
//! in process, on top of the actor-owned storage engine. Tests swap it for
//! [`panel_framework::mock::MockTransport`].
//!
//! ## 🗺️ Module Tour
//!
//! ### 1. The Client Side
//! - [`mutation`]: delete / force delete / restore / detach, by list or "all matching".
//! - [`filters`]: filter definitions, the filter store, and URL synchronization.
//! - [`resource`]: resources, selections and the query context stamped on requests.
//!
//! ### 2. The Server Side
//! - [`server`]: resource schemas, query resolution and the in-process API.
//! - [`metrics`]: which metric cards a caller may see, with filters attached.
//! - [`actions`]: multi-step actions run as one transactional batch.
//! - [`attachments`]: pruning of stale pending attachments.
//!
//! ### 3. The Orchestrator ([`lifecycle`])
//! - [`PanelSystem`](lifecycle::PanelSystem) starts storage, wires services, shuts down.
//!
//! ## 🚀 Quick Start
//!
//! ```bash
//! RUST_LOG=info cargo run
//! cargo test
//! ```

pub mod actions;
pub mod attachments;
pub mod filters;
pub mod lifecycle;
pub mod metrics;
pub mod mutation;
pub mod resource;
pub mod server;
