use crate::resource::{Resource, ResourceKey, ViewContext};
use async_trait::async_trait;
use panel_framework::{HttpTransport, Method, PanelConfig, PanelError, Request, StateStore};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// The resource table a mutation refreshes once it succeeds.
#[async_trait]
pub trait ResourceListing: Send + Sync {
    /// Re-fetches the listing.
    async fn refresh(&self) -> Result<(), PanelError>;

    /// The rows currently selected by the user.
    fn selected_resources(&self) -> Vec<Resource>;
}

#[derive(Deserialize)]
struct IndexPayload {
    resources: Vec<Resource>,
}

/// A listing fetched from the index endpoint with the view's query context.
pub struct RemoteListing {
    transport: Arc<dyn HttpTransport>,
    filters: Arc<dyn StateStore>,
    view: ViewContext,
    endpoint: String,
    resources: Mutex<Vec<Resource>>,
    selected: Mutex<HashSet<ResourceKey>>,
    refreshes: AtomicUsize,
}

impl RemoteListing {
    pub fn new(
        config: &PanelConfig,
        transport: Arc<dyn HttpTransport>,
        filters: Arc<dyn StateStore>,
        view: ViewContext,
    ) -> Self {
        Self {
            endpoint: config.resource_endpoint(&view.resource_name),
            transport,
            filters,
            view,
            resources: Mutex::new(Vec::new()),
            selected: Mutex::new(HashSet::new()),
            refreshes: AtomicUsize::new(0),
        }
    }

    pub fn resources(&self) -> Vec<Resource> {
        self.resources.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of completed fetches.
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn select(&self, keys: impl IntoIterator<Item = impl Into<ResourceKey>>) {
        let mut selected = self.selected.lock().unwrap_or_else(PoisonError::into_inner);
        selected.extend(keys.into_iter().map(Into::into));
    }

    pub fn select_all(&self) {
        let keys: Vec<ResourceKey> = self.resources().into_iter().map(|r| r.id.value).collect();
        self.select(keys);
    }
}

#[async_trait]
impl ResourceListing for RemoteListing {
    async fn refresh(&self) -> Result<(), PanelError> {
        let encoded = self
            .filters
            .get_string(&format!("{}/currentEncodedFilters", self.view.resource_name));
        let url = match &self.view.lens {
            Some(lens) => format!("{}/lens/{lens}", self.endpoint),
            None => self.endpoint.clone(),
        };
        let request = Request::new(Method::Get, url)
            .params(self.view.query_context(Some(encoded)).to_params());
        let response = self.transport.request(request).await?;
        let payload: IndexPayload = serde_json::from_value(response.body)
            .map_err(|e| PanelError::ValidationFailure(format!("malformed listing: {e}")))?;

        let present: HashSet<ResourceKey> = payload.resources.iter().map(|r| r.id.value.clone()).collect();
        // Selections do not survive their rows.
        self.selected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|key| present.contains(key));
        debug!(resource = %self.view.resource_name, count = payload.resources.len(), "Listing refreshed");
        *self.resources.lock().unwrap_or_else(PoisonError::into_inner) = payload.resources;
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn selected_resources(&self) -> Vec<Resource> {
        let selected = self.selected.lock().unwrap_or_else(PoisonError::into_inner).clone();
        self.resources()
            .into_iter()
            .filter(|resource| selected.contains(&resource.id.value))
            .collect()
    }
}
