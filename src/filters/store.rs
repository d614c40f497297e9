//! The filter state of one resource namespace, behind the [`StateStore`] seam.
//!
//! | Key | Kind | Payload / value |
//! |-----|------|-----------------|
//! | `{resource}/fetchFilters` | action | scope object: `viaResource`, `viaResourceId`, `viaRelationship`, `relationshipType`, `lens` |
//! | `{resource}/resetFilterState` | action | `{ resourceName, lens? }`; re-fetches so values return to their defaults |
//! | `{resource}/initializeCurrentFilterValuesFromQueryString` | action | encoded filter string |
//! | `{resource}/updateFilterState` | action & mutation | `{ filterClass, value }` |
//! | `{resource}/clearFilters` | mutation | none |
//! | `{resource}/storeFilters` | mutation | array of filter definitions |
//! | `{resource}/filters` | getter | array of filter definitions |
//! | `{resource}/filtersAreApplied` | getter | bool |
//! | `{resource}/activeFilterCount` | getter | number |
//! | `{resource}/currentEncodedFilters` | getter, watchable | string |

use super::definition::{decode_filters, encode_filters, FilterDefinition};
use async_trait::async_trait;
use panel_framework::{HttpTransport, Method, PanelConfig, PanelError, Params, Request, StateStore};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Default)]
struct FilterState {
    filters: Vec<FilterDefinition>,
    /// Scope of the last fetch, reused when the state is reset.
    scope: Params,
}

pub struct FilterStore {
    resource_name: String,
    endpoint: String,
    transport: Arc<dyn HttpTransport>,
    state: Mutex<FilterState>,
    encoded: watch::Sender<Value>,
}

impl FilterStore {
    pub fn new(resource_name: impl Into<String>, config: &PanelConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let resource_name = resource_name.into();
        Self {
            endpoint: config.resource_endpoint(&resource_name),
            resource_name,
            transport,
            state: Mutex::new(FilterState::default()),
            encoded: watch::channel(Value::String(String::new())).0,
        }
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn filters(&self) -> Vec<FilterDefinition> {
        self.lock().filters.clone()
    }

    pub fn current_encoded_filters(&self) -> String {
        encode_filters(&self.lock().filters)
    }

    pub fn active_filter_count(&self) -> usize {
        self.lock().filters.iter().filter(|filter| filter.is_active()).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FilterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pushes the encoded filters to watchers when they moved.
    fn publish(&self) {
        let current = Value::String(self.current_encoded_filters());
        self.encoded.send_if_modified(|encoded| {
            if *encoded == current {
                return false;
            }
            *encoded = current;
            true
        });
    }

    /// Splits `"{resource}/{name}"`, rejecting other namespaces.
    fn local_name<'k>(&self, key: &'k str) -> Option<&'k str> {
        key.strip_prefix(self.resource_name.as_str())?.strip_prefix('/')
    }

    async fn fetch(&self, mut scope: Params) -> Result<(), PanelError> {
        let lens = scope
            .remove("lens")
            .and_then(|lens| lens.as_str().map(str::to_string))
            .filter(|lens| !lens.is_empty());
        scope.remove("resourceName");

        let url = match &lens {
            Some(lens) => format!("{}/lens/{}/filters", self.endpoint, lens),
            None => format!("{}/filters", self.endpoint),
        };
        let response = self
            .transport
            .request(Request::new(Method::Get, url).params(scope.clone()))
            .await?;
        let filters: Vec<FilterDefinition> = serde_json::from_value(response.body)
            .map_err(|e| PanelError::ValidationFailure(format!("malformed filter definitions: {e}")))?;

        debug!(resource = %self.resource_name, count = filters.len(), "Fetched filters");
        let mut state = self.lock();
        state.filters = filters;
        state.scope = scope;
        Ok(())
    }

    fn update_filter(&self, payload: &Value) -> Result<(), PanelError> {
        let class = payload
            .get("filterClass")
            .and_then(Value::as_str)
            .ok_or_else(|| PanelError::ValidationFailure("updateFilterState needs a filterClass".into()))?;
        let value = payload.get("value").cloned().unwrap_or(Value::Null);

        let mut state = self.lock();
        let filter = state
            .filters
            .iter_mut()
            .find(|filter| filter.class == class)
            .ok_or_else(|| PanelError::NotFound(format!("filter {class}")))?;
        filter.current_value = value;
        Ok(())
    }

    fn apply_encoded(&self, encoded: &str) -> Result<(), PanelError> {
        let values = decode_filters(encoded)?;
        let mut state = self.lock();
        for (class, value) in values {
            match state.filters.iter_mut().find(|filter| filter.class == class) {
                Some(filter) => filter.current_value = value,
                None => debug!(resource = %self.resource_name, %class, "Ignoring value for unknown filter"),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for FilterStore {
    fn get(&self, key: &str) -> Value {
        match self.local_name(key) {
            Some("filters") => serde_json::to_value(self.filters()).unwrap_or(Value::Null),
            Some("filtersAreApplied") => Value::Bool(self.active_filter_count() > 0),
            Some("activeFilterCount") => json!(self.active_filter_count()),
            Some("currentEncodedFilters") => Value::String(self.current_encoded_filters()),
            _ => Value::Null,
        }
    }

    async fn dispatch(&self, action: &str, payload: Value) -> Result<(), PanelError> {
        let result = match self.local_name(action) {
            Some("fetchFilters") => self.fetch(payload.as_object().cloned().unwrap_or_default()).await,
            Some("resetFilterState") => {
                let mut scope = self.lock().scope.clone();
                scope.remove("lens");
                if let Some(lens) = payload.get("lens").filter(|lens| !lens.is_null()) {
                    scope.insert("lens".into(), lens.clone());
                }
                self.fetch(scope).await
            }
            Some("initializeCurrentFilterValuesFromQueryString") => {
                self.apply_encoded(payload.as_str().unwrap_or_default())
            }
            Some("updateFilterState") => self.update_filter(&payload),
            _ => Err(PanelError::NotFound(format!("action {action}"))),
        };
        self.publish();
        match &result {
            Ok(()) => info!(resource = %self.resource_name, %action, "Dispatched"),
            Err(e) => warn!(resource = %self.resource_name, %action, error = %e, "Dispatch rejected"),
        }
        result
    }

    fn commit(&self, mutation: &str, payload: Value) {
        match self.local_name(mutation) {
            Some("clearFilters") => self.lock().filters.clear(),
            Some("storeFilters") => match serde_json::from_value(payload) {
                Ok(filters) => self.lock().filters = filters,
                Err(e) => warn!(resource = %self.resource_name, error = %e, "Ignoring malformed filters"),
            },
            Some("updateFilterState") => {
                if let Err(e) = self.update_filter(&payload) {
                    warn!(resource = %self.resource_name, error = %e, "Ignoring filter update");
                }
            }
            _ => warn!(resource = %self.resource_name, %mutation, "Unknown mutation"),
        }
        self.publish();
    }

    fn watch(&self, key: &str) -> Option<watch::Receiver<Value>> {
        (self.local_name(key) == Some("currentEncodedFilters")).then(|| self.encoded.subscribe())
    }
}
