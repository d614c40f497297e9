//! # State Store
//!
//! The explicit state-repository seam that client-side components read and
//! mutate view state through. Keys are namespaced the same way for getters,
//! actions and mutations: `"{namespace}/{name}"`, e.g. `"users/filtersAreApplied"`.

use crate::error::PanelError;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads a getter. Unknown keys read as `Value::Null`.
    fn get(&self, key: &str) -> Value;

    /// Runs an asynchronous action. A rejected dispatch propagates to the caller.
    async fn dispatch(&self, action: &str, payload: Value) -> Result<(), PanelError>;

    /// Applies a synchronous mutation.
    fn commit(&self, mutation: &str, payload: Value);

    /// Follows a getter as it changes. `None` when the store does not push
    /// changes for `key`; callers then have to read it again themselves.
    fn watch(&self, _key: &str) -> Option<watch::Receiver<Value>> {
        None
    }

    /// Reads a boolean getter; anything but `true` is `false`.
    fn get_bool(&self, key: &str) -> bool {
        self.get(key).as_bool().unwrap_or(false)
    }

    /// Reads a string getter; non-strings read as the empty string.
    fn get_string(&self, key: &str) -> String {
        match self.get(key) {
            Value::String(s) => s,
            _ => String::new(),
        }
    }
}
