//! # Storage Engine
//!
//! An in-memory, actor-owned table store that satisfies the storage contract the
//! panel relies on: soft delete, force delete, restore and pivot-row deletion as
//! distinct primitives, plus session-scoped `begin/commit/rollback`.
//!
//! ```rust
//! use panel_framework::storage::StorageActor;
//! use panel_framework::TransactionRunner;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (actor, client) = StorageActor::new(16);
//!     tokio::spawn(actor.run());
//!
//!     let attributes = json!({ "name": "Ada" }).as_object().cloned().unwrap();
//!     let id = client.insert("users", attributes).await.unwrap();
//!
//!     let runner = TransactionRunner::new(client.connect());
//!     let connection = runner.connection().clone();
//!     let result: Result<(), panel_framework::PanelError> = runner
//!         .run(|_batch| async move {
//!             connection.soft_delete("users", vec![id]).await?;
//!             Err(panel_framework::PanelError::ValidationFailure("abort".into()))
//!         })
//!         .await;
//!
//!     assert!(result.is_err());
//!     assert!(!client.find("users", id).await.unwrap().unwrap().is_trashed());
//! }
//! ```

pub mod actor;
pub mod client;
pub mod message;
pub mod row;

pub use actor::StorageActor;
pub use client::StorageClient;
pub use message::{Envelope, Response, SessionId, StorageRequest};
pub use row::{Attributes, Row};
