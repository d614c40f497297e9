//! # In-Process API
//!
//! The server half of the resource endpoints, served by [`LocalApi`] straight
//! from the storage engine. Resources are described by [`ResourceSchema`]s
//! collected in a [`SchemaRegistry`].
//!
//! Every endpoint first checks the resource's `view_any` policy (403 when
//! denied). Per-record `delete`/`restore`/`force_delete` denials skip the
//! record without failing the request. A lens narrows every endpoint that
//! works on "all matching" rows to the rows its predicate accepts.

pub mod api;
pub mod query;
pub mod schema;

pub use api::LocalApi;
pub use query::{matching_rows, resolve_targets, Matched, Targets};
pub use schema::{AllowAll, Lens, Relationship, ResourcePolicy, ResourceSchema, SchemaRegistry};
