//! # Filter State
//!
//! - [`FilterStore`]: the concrete store holding one resource's filter definitions.
//! - [`FilterStateSynchronizer`]: reconciles store, URL and server for a view.
//! - [`QueryStringLayer`] / [`UrlState`]: where `{resource}_page` and
//!   `{resource}_filter` live.

pub mod definition;
pub mod query_string;
pub mod store;
pub mod synchronizer;

pub use definition::{decode_filters, encode_filters, is_active_value, FilterDefinition, FilterOption};
pub use query_string::{QueryStringLayer, UrlState};
pub use store::FilterStore;
pub use synchronizer::FilterStateSynchronizer;
