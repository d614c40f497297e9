//! # Resource Mutation Service
//!
//! Bulk delete, force-delete, restore and detach, by explicit list or by
//! "all matching the current query".
//!
//! | Operation | Endpoint | Method |
//! |-----------|----------|--------|
//! | delete | `{prefix}/{resource}` (`/lens/{lens}` for all matching) | DELETE |
//! | detach | `{prefix}/{resource}/detach` | DELETE |
//! | force delete | `{prefix}/{resource}/force` (`/lens/{lens}/force` for all matching) | DELETE |
//! | restore | `{prefix}/{resource}/restore` (`/lens/{lens}/restore` for all matching) | PUT |
//!
//! Per operation: `Idle -> Requested -> Settled -> Idle`. A [`ModalGuard`] is
//! held from the request until settlement, so a modal never has two mutations
//! in flight and always ends up closed.

pub mod listing;
pub mod modal;
pub mod service;

pub use listing::{RemoteListing, ResourceListing};
pub use modal::{Modal, ModalGuard};
pub use service::ResourceMutationService;
