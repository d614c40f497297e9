use crate::actions::ActionRunner;
use crate::attachments::PruneStaleAttachments;
use crate::filters::{FilterStateSynchronizer, FilterStore, QueryStringLayer};
use crate::mutation::{RemoteListing, ResourceMutationService};
use crate::resource::ViewContext;
use crate::server::{LocalApi, ResourceSchema, SchemaRegistry};
use panel_framework::{EventBus, HttpTransport, PanelConfig, StorageActor, StorageClient};
use std::sync::Arc;
use tracing::{error, info};

/// Owns the storage actor and wires every panel component to it.
///
/// # Example
///
/// ```ignore
/// let system = PanelSystem::new(PanelConfig::default(), schemas);
///
/// let view = ViewContext::new("users");
/// let filters = system.filter_store("users");
/// let listing = system.listing(view.clone(), filters.clone());
/// let mutations = system.mutation_service(view, listing, filters);
/// mutations.delete_selected_resources().await?;
///
/// drop(mutations);
/// system.shutdown().await?;
/// ```
pub struct PanelSystem {
    pub config: PanelConfig,

    /// In-process API every client component talks to.
    pub api: LocalApi,

    /// Direct storage access, for seeding and inspection.
    pub storage: StorageClient,

    pub actions: ActionRunner,

    /// Shared by every service this system builds.
    pub events: EventBus,

    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl PanelSystem {
    /// Spawns the storage actor and builds the API over `schemas`.
    pub fn new(config: PanelConfig, schemas: impl IntoIterator<Item = ResourceSchema>) -> Self {
        let (storage_actor, storage) = StorageActor::new(config.storage_buffer);
        let handle = tokio::spawn(storage_actor.run());

        let registry = SchemaRegistry::new(schemas);
        let api = LocalApi::new(&config, storage.clone(), registry.clone());
        let actions = ActionRunner::new(storage.clone(), registry);

        info!(prefix = %config.api_prefix, "Panel started");
        Self {
            config,
            api,
            storage,
            actions,
            events: EventBus::new(),
            handles: vec![handle],
        }
    }

    pub fn transport(&self) -> Arc<dyn HttpTransport> {
        Arc::new(self.api.clone())
    }

    pub fn filter_store(&self, resource_name: &str) -> Arc<FilterStore> {
        Arc::new(FilterStore::new(resource_name, &self.config, self.transport()))
    }

    pub fn listing(&self, view: ViewContext, filters: Arc<FilterStore>) -> Arc<RemoteListing> {
        Arc::new(RemoteListing::new(&self.config, self.transport(), filters, view))
    }

    pub fn mutation_service(
        &self,
        view: ViewContext,
        listing: Arc<RemoteListing>,
        filters: Arc<FilterStore>,
    ) -> ResourceMutationService {
        ResourceMutationService::new(&self.config, self.transport(), listing, filters, self.events.clone(), view)
    }

    pub fn filter_synchronizer(
        &self,
        view: ViewContext,
        filters: Arc<FilterStore>,
        query_string: Arc<dyn QueryStringLayer>,
    ) -> FilterStateSynchronizer {
        FilterStateSynchronizer::new(view, filters, query_string, self.events.clone())
    }

    pub fn attachment_pruner(&self) -> PruneStaleAttachments {
        PruneStaleAttachments::new(self.storage.clone(), &self.config)
    }

    /// Drops this system's storage handles and waits for the storage actor to stop.
    ///
    /// Services built from the system hold storage handles through their
    /// transport; drop them first, or this waits for them.
    pub async fn shutdown(self) -> Result<(), String> {
        info!("Shutting down panel...");

        drop(self.api);
        drop(self.actions);
        drop(self.storage);

        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Storage task failed: {:?}", e);
                return Err(format!("Storage task failed: {:?}", e));
            }
        }

        info!("Panel shutdown complete.");
        Ok(())
    }
}
