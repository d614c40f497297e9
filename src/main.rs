//! Demo: walks the panel through delete, restore, detach, filters, metrics,
//! a transactional action and attachment pruning, against in-process storage.
//!
//! ```bash
//! RUST_LOG=info cargo run
//! ```

use admin_panel::actions::PanelAction;
use admin_panel::filters::{FilterDefinition, UrlState};
use admin_panel::lifecycle::PanelSystem;
use admin_panel::metrics::{Card, Metric, MetricRequest};
use admin_panel::mutation::{RemoteListing, ResourceListing};
use admin_panel::resource::{Selection, TrashedState, ViewContext};
use admin_panel::server::ResourceSchema;
use async_trait::async_trait;
use panel_framework::storage::{Attributes, Row};
use panel_framework::tracing::setup_tracing;
use panel_framework::{BatchId, PanelConfig, PanelError, StorageClient};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, Instrument};

struct MarkVerified;

#[async_trait]
impl PanelAction for MarkVerified {
    fn name(&self) -> &str {
        "Mark Verified"
    }

    async fn handle(&self, connection: &StorageClient, _batch_id: BatchId, models: &[Row]) -> Result<(), PanelError> {
        for model in models {
            connection.update("users", model.id, attributes(json!({ "verified": true }))).await?;
        }
        Ok(())
    }
}

fn attributes(value: serde_json::Value) -> Attributes {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Attributes::new(),
    }
}

fn schemas() -> Vec<ResourceSchema> {
    vec![
        ResourceSchema::new("users", "users")
            .soft_deletes()
            .lens("active-users", |row| row.get_str("status") == Some("active"))
            .filter(
                FilterDefinition::select("status", "Status")
                    .option("Active", "active")
                    .option("Suspended", "suspended"),
            )
            .card(Card::Metric(Metric::new("New Users", "new-users").refresh_when_filters_change()))
            .card(Card::Metric(Metric::new("Total Users", "total-users")))
            .detail_card(Card::Metric(Metric::new("Logins", "logins"))),
        ResourceSchema::new("roles", "roles").belongs_to_many("users", "users", "role_user", "role_id", "user_id"),
    ]
}

#[tokio::main]
async fn main() -> Result<(), String> {
    setup_tracing();

    let config = PanelConfig::default().with_env_overrides().map_err(|e| e.to_string())?;
    let system = PanelSystem::new(config, schemas());

    async {
        seed(&system.storage).await?;

        let view = ViewContext::new("users");
        let filters = system.filter_store("users");
        let listing = system.listing(view.clone(), filters.clone());
        let mutations = system.mutation_service(view.clone(), listing.clone(), filters.clone());
        let _deleted = system
            .events
            .subscribe(panel_framework::EventKind::ResourcesDeleted, |event| info!(event = event.name(), "Heard"));

        // Filters
        let url = Arc::new(UrlState::new());
        let synchronizer = system.filter_synchronizer(view.clone(), filters.clone(), url.clone());
        synchronizer.initialize_filters(None).await?;
        synchronizer.apply_filter("status", json!("suspended")).await?;
        info!(filter = ?url.get("users_filter"), page = ?url.get("users_page"), "Filter applied");

        // Delete everything matching the filter, then clear it.
        listing.refresh().await?;
        mutations.open_delete_modal();
        mutations.delete_all_matching_resources().await?;
        synchronizer.clear_selected_filters(None).await?;
        listing.refresh().await?;
        info!(visible = listing.resources().len(), "After delete");

        // Restore from the trash.
        let trashed_view = view.clone().trashed(TrashedState::Only);
        let trashed_listing = system.listing(trashed_view.clone(), filters.clone());
        trashed_listing.refresh().await?;
        trashed_listing.select_all();
        let restorer = system.mutation_service(trashed_view, trashed_listing.clone(), filters.clone());
        restorer.open_restore_modal();
        restorer.restore_selected_resources().await?;

        // Detach a user from a role.
        let role_view = ViewContext::new("users")
            .via("roles", 1u64, "users")
            .relationship_type("belongsToMany");
        let role_listing: Arc<RemoteListing> = system.listing(role_view.clone(), filters.clone());
        role_listing.refresh().await?;
        role_listing.select([1u64]);
        let role_mutations = system.mutation_service(role_view, role_listing.clone(), filters.clone());
        role_mutations.delete_selected_resources().await?;
        info!(members = role_listing.resources().len(), "Role members after detach");

        // Metrics
        let schema = system.api.registry().get("users")?;
        let metrics = MetricRequest::new(&*schema).available_metrics()?;
        for metric in metrics {
            info!(metric = %metric.uri_key, filters = metric.available_filters.map_or(0, |f| f.len()), "Metric");
        }

        // Transactional action
        let batch_id = system
            .actions
            .execute(&MarkVerified, "users", &Selection::AllMatching, &view.query_context(None))
            .await?;
        let events = system.actions.batch_events(batch_id).await?;
        info!(%batch_id, events = events.len(), "Action recorded");

        // Housekeeping
        let pruned = system.attachment_pruner().run().await?;
        info!(pruned, "Attachments pruned");

        Ok::<_, PanelError>(())
    }
    .instrument(tracing::info_span!("demo"))
    .await
    .map_err(|e| e.to_string())?;

    system.shutdown().await
}

async fn seed(storage: &StorageClient) -> Result<(), PanelError> {
    for (name, status) in [("Ada", "active"), ("Grace", "suspended"), ("Linus", "active"), ("Ken", "suspended")] {
        storage.insert("users", attributes(json!({ "name": name, "status": status }))).await?;
    }
    let admin = storage.insert("roles", attributes(json!({ "name": "admin" }))).await?;
    for user in [1u64, 3] {
        storage
            .insert("role_user", attributes(json!({ "role_id": admin, "user_id": user })))
            .await?;
    }
    storage
        .insert_at(
            "pending_attachments",
            attributes(json!({ "attachment": "draft.png" })),
            chrono::Utc::now() - chrono::Duration::hours(48),
        )
        .await?;
    info!("Seeded demo data");
    Ok(())
}
