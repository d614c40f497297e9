use panel_framework::Params;
use serde_json::Value;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// The URL layer a view's filter and page state is mirrored into.
pub trait QueryStringLayer: Send + Sync {
    /// Applies `updates` to the query string and pushes the result.
    fn update_query_string(&self, updates: Params);
}

/// An in-memory query string that records every push.
#[derive(Debug, Default)]
pub struct UrlState {
    params: Mutex<Params>,
    history: Mutex<Vec<Params>>,
}

impl UrlState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.params.lock().unwrap_or_else(PoisonError::into_inner).get(name).cloned()
    }

    /// Every update applied so far, in order.
    pub fn history(&self) -> Vec<Params> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl QueryStringLayer for UrlState {
    fn update_query_string(&self, updates: Params) {
        debug!(?updates, "Pushing query string");
        self.params
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(updates.clone());
        self.history.lock().unwrap_or_else(PoisonError::into_inner).push(updates);
    }
}
