//! # Panel Framework
//!
//! Domain-agnostic plumbing for the admin panel: the seams the orchestration
//! code is written against, plus in-process implementations of them.
//!
//! ## 🗺️ Module Tour
//!
//! - [`transport`]: the injected `{method, url, params}` request capability.
//! - [`store`]: the explicit state-repository seam (`get` / `dispatch` / `commit`).
//! - [`events`]: a typed publish/subscribe bus for lifecycle events.
//! - [`transaction`]: the atomic unit-of-work runner and its [`BatchId`].
//! - [`storage`]: an actor-owned, in-memory table store with soft deletes and
//!   session-scoped transactions.
//! - [`mock`]: test doubles for the transport and store seams.
//! - [`config`] and [`tracing`]: ambient configuration and logging setup.
//!
//! ## Error Handling
//!
//! Every fallible operation returns [`PanelError`]. Its variants map onto the
//! HTTP-equivalent statuses a caller would surface (see [`PanelError::status`]).

pub mod config;
pub mod error;
pub mod events;
pub mod mock;
pub mod storage;
pub mod store;
pub mod tracing;
pub mod transaction;
pub mod transport;

pub use config::PanelConfig;
pub use error::PanelError;
pub use events::{EventBus, EventKind, PanelEvent, Subscription};
pub use storage::{StorageActor, StorageClient};
pub use store::StateStore;
pub use transaction::{committed, BatchId, TransactionRunner, TransactionalConnection};
pub use transport::{HttpTransport, Method, Params, Request, Response};
