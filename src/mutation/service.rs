use super::listing::ResourceListing;
use super::modal::Modal;
use crate::resource::{keys_to_value, map_pivots, map_resources, Resource, Selection, ViewContext};
use panel_framework::{EventBus, HttpTransport, Method, PanelConfig, PanelError, PanelEvent, Request, StateStore};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Delete, force-delete, restore and detach for one resource view.
///
/// Each operation issues exactly one request. On success the listing is
/// refreshed (or the caller's callback runs instead) and then the matching
/// event is announced. The modal closes on every outcome.
pub struct ResourceMutationService {
    endpoint: String,
    transport: Arc<dyn HttpTransport>,
    listing: Arc<dyn ResourceListing>,
    filters: Arc<dyn StateStore>,
    events: EventBus,
    view: ViewContext,
    delete_modal: Modal,
    restore_modal: Modal,
}

enum Target {
    Explicit(Vec<Resource>),
    AllMatching,
}

impl ResourceMutationService {
    pub fn new(
        config: &PanelConfig,
        transport: Arc<dyn HttpTransport>,
        listing: Arc<dyn ResourceListing>,
        filters: Arc<dyn StateStore>,
        events: EventBus,
        view: ViewContext,
    ) -> Self {
        Self {
            endpoint: config.resource_endpoint(&view.resource_name),
            transport,
            listing,
            filters,
            events,
            view,
            delete_modal: Modal::default(),
            restore_modal: Modal::default(),
        }
    }

    pub fn view(&self) -> &ViewContext {
        &self.view
    }

    pub fn open_delete_modal(&self) {
        self.delete_modal.open();
    }

    pub fn open_restore_modal(&self) {
        self.restore_modal.open();
    }

    pub fn delete_modal_open(&self) -> bool {
        self.delete_modal.is_open()
    }

    pub fn restore_modal_open(&self) -> bool {
        self.restore_modal.is_open()
    }

    // =========================================================================
    // DELETE
    // =========================================================================

    /// Deletes `resources`, or detaches them when the view is many-to-many.
    pub async fn delete_resources(&self, resources: &[Resource]) -> Result<(), PanelError> {
        self.delete_resources_with(resources, || self.listing.refresh()).await
    }

    /// Like [`delete_resources`](Self::delete_resources), with `callback` in place of the refresh.
    /// A many-to-many view detaches and refreshes as usual.
    pub async fn delete_resources_with<F, Fut>(&self, resources: &[Resource], callback: F) -> Result<(), PanelError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), PanelError>>,
    {
        if self.view.via_many_to_many {
            return self.detach_resources(resources).await;
        }
        let request = self.request(Method::Delete, self.endpoint.clone(), Target::Explicit(resources.to_vec()));
        self.settle(&self.delete_modal, request, callback, PanelEvent::ResourcesDeleted)
            .await
    }

    pub async fn delete_selected_resources(&self) -> Result<(), PanelError> {
        self.delete_resources(&self.listing.selected_resources()).await
    }

    #[instrument(skip(self), fields(resource = %self.view.resource_name))]
    pub async fn delete_all_matching_resources(&self) -> Result<(), PanelError> {
        if self.view.via_many_to_many {
            return self.detach_all_matching_resources().await;
        }
        let request = self.request(Method::Delete, self.lens_endpoint(""), Target::AllMatching);
        self.settle(
            &self.delete_modal,
            request,
            || self.listing.refresh(),
            PanelEvent::ResourcesDeleted,
        )
        .await
    }

    /// Deletes a selection; see [`delete_resources`](Self::delete_resources).
    pub async fn delete(&self, selection: &Selection) -> Result<(), PanelError> {
        match selection {
            Selection::Resources(resources) => self.delete_resources(resources).await,
            Selection::AllMatching => self.delete_all_matching_resources().await,
        }
    }

    // =========================================================================
    // DETACH
    // =========================================================================

    /// Removes the pivot rows linking `resources` to the parent record.
    pub async fn detach_resources(&self, resources: &[Resource]) -> Result<(), PanelError> {
        let url = format!("{}/detach", self.endpoint);
        let request = self
            .request(Method::Delete, url, Target::Explicit(resources.to_vec()))
            .param("pivots", keys_to_value(map_pivots(resources)));
        self.settle(
            &self.delete_modal,
            request,
            || self.listing.refresh(),
            PanelEvent::ResourcesDetached,
        )
        .await
    }

    #[instrument(skip(self), fields(resource = %self.view.resource_name))]
    pub async fn detach_all_matching_resources(&self) -> Result<(), PanelError> {
        let url = format!("{}/detach", self.endpoint);
        let request = self.request(Method::Delete, url, Target::AllMatching);
        self.settle(
            &self.delete_modal,
            request,
            || self.listing.refresh(),
            PanelEvent::ResourcesDetached,
        )
        .await
    }

    pub async fn detach(&self, selection: &Selection) -> Result<(), PanelError> {
        match selection {
            Selection::Resources(resources) => self.detach_resources(resources).await,
            Selection::AllMatching => self.detach_all_matching_resources().await,
        }
    }

    // =========================================================================
    // FORCE DELETE
    // =========================================================================

    /// Permanently deletes `resources`. Never redirected to a detach.
    pub async fn force_delete_resources(&self, resources: &[Resource]) -> Result<(), PanelError> {
        self.force_delete_resources_with(resources, || self.listing.refresh())
            .await
    }

    pub async fn force_delete_resources_with<F, Fut>(
        &self,
        resources: &[Resource],
        callback: F,
    ) -> Result<(), PanelError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), PanelError>>,
    {
        let url = format!("{}/force", self.endpoint);
        let request = self.request(Method::Delete, url, Target::Explicit(resources.to_vec()));
        self.settle(&self.delete_modal, request, callback, PanelEvent::ResourcesDeleted)
            .await
    }

    pub async fn force_delete_selected_resources(&self) -> Result<(), PanelError> {
        self.force_delete_resources(&self.listing.selected_resources()).await
    }

    #[instrument(skip(self), fields(resource = %self.view.resource_name))]
    pub async fn force_delete_all_matching_resources(&self) -> Result<(), PanelError> {
        let request = self.request(Method::Delete, self.lens_endpoint("/force"), Target::AllMatching);
        self.settle(
            &self.delete_modal,
            request,
            || self.listing.refresh(),
            PanelEvent::ResourcesDeleted,
        )
        .await
    }

    pub async fn force_delete(&self, selection: &Selection) -> Result<(), PanelError> {
        match selection {
            Selection::Resources(resources) => self.force_delete_resources(resources).await,
            Selection::AllMatching => self.force_delete_all_matching_resources().await,
        }
    }

    // =========================================================================
    // RESTORE
    // =========================================================================

    pub async fn restore_resources(&self, resources: &[Resource]) -> Result<(), PanelError> {
        self.restore_resources_with(resources, || self.listing.refresh()).await
    }

    pub async fn restore_resources_with<F, Fut>(&self, resources: &[Resource], callback: F) -> Result<(), PanelError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), PanelError>>,
    {
        let url = format!("{}/restore", self.endpoint);
        let request = self.request(Method::Put, url, Target::Explicit(resources.to_vec()));
        self.settle(&self.restore_modal, request, callback, PanelEvent::ResourcesRestored)
            .await
    }

    pub async fn restore_selected_resources(&self) -> Result<(), PanelError> {
        self.restore_resources(&self.listing.selected_resources()).await
    }

    #[instrument(skip(self), fields(resource = %self.view.resource_name))]
    pub async fn restore_all_matching_resources(&self) -> Result<(), PanelError> {
        let request = self.request(Method::Put, self.lens_endpoint("/restore"), Target::AllMatching);
        self.settle(
            &self.restore_modal,
            request,
            || self.listing.refresh(),
            PanelEvent::ResourcesRestored,
        )
        .await
    }

    pub async fn restore(&self, selection: &Selection) -> Result<(), PanelError> {
        match selection {
            Selection::Resources(resources) => self.restore_resources(resources).await,
            Selection::AllMatching => self.restore_all_matching_resources().await,
        }
    }

    // =========================================================================
    // PLUMBING
    // =========================================================================

    /// `{endpoint}[/lens/{lens}]{suffix}`; used by the all-matching variants.
    fn lens_endpoint(&self, suffix: &str) -> String {
        match &self.view.lens {
            Some(lens) => format!("{}/lens/{}{}", self.endpoint, lens, suffix),
            None => format!("{}{}", self.endpoint, suffix),
        }
    }

    /// Stamps the current query context and the target on a request.
    fn request(&self, method: Method, url: String, target: Target) -> Request {
        let encoded = self
            .filters
            .get_string(&format!("{}/currentEncodedFilters", self.view.resource_name));
        let resources = match target {
            Target::Explicit(resources) => keys_to_value(map_resources(&resources)),
            Target::AllMatching => Value::from("all"),
        };
        Request::new(method, url)
            .params(self.view.query_context(Some(encoded)).to_params())
            .param("resources", resources)
    }

    async fn settle<F, Fut>(&self, modal: &Modal, request: Request, after: F, event: PanelEvent) -> Result<(), PanelError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), PanelError>>,
    {
        let _guard = modal.acquire()?;
        debug!(method = %request.method, url = %request.url, params = ?request.params, "Sending mutation");

        if let Err(e) = self.transport.request(request).await {
            warn!(resource = %self.view.resource_name, error = %e, "Mutation rejected");
            return Err(e);
        }
        after().await?;

        info!(resource = %self.view.resource_name, event = event.name(), "Mutation settled");
        self.events.emit(event);
        Ok(())
    }
}
