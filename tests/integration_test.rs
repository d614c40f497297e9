use admin_panel::actions::{PanelAction, ACTION_EVENTS_TABLE};
use admin_panel::filters::{FilterDefinition, UrlState};
use admin_panel::lifecycle::PanelSystem;
use admin_panel::metrics::{Card, Metric};
use admin_panel::mutation::ResourceListing;
use admin_panel::resource::{Resource, ResourceKey, Selection, TrashedState, ViewContext};
use admin_panel::server::{ResourcePolicy, ResourceSchema};
use async_trait::async_trait;
use panel_framework::storage::{Attributes, Row};
use panel_framework::{BatchId, HttpTransport, Method, PanelConfig, PanelError, Request, StorageClient};
use serde_json::{json, Value};

fn attributes(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map,
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

/// Users 1..=4 (2 and 4 suspended), role 1 holding users 1 and 3.
async fn seed(storage: &StorageClient) {
    for (name, status) in [("Ada", "active"), ("Grace", "suspended"), ("Linus", "active"), ("Ken", "suspended")] {
        storage
            .insert("users", attributes(json!({ "name": name, "status": status })))
            .await
            .unwrap();
    }
    let role = storage.insert("roles", attributes(json!({ "name": "admin" }))).await.unwrap();
    for user in [1u64, 3] {
        storage
            .insert("role_user", attributes(json!({ "role_id": role, "user_id": user })))
            .await
            .unwrap();
    }
}

async fn live_ids(storage: &StorageClient, table: &str) -> Vec<u64> {
    storage
        .scan(table)
        .await
        .unwrap()
        .into_iter()
        .filter(|row| !row.is_trashed())
        .map(|row| row.id)
        .collect()
}

async fn started() -> PanelSystem {
    let system = PanelSystem::new(PanelConfig::default(), schemas());
    seed(&system.storage).await;
    system
}

#[tokio::test]
async fn filtered_delete_all_matching_then_restore() {
    let system = started().await;

    let deleted = async {
        let view = ViewContext::new("users");
        let filters = system.filter_store("users");
        let listing = system.listing(view.clone(), filters.clone());
        let mutations = system.mutation_service(view.clone(), listing.clone(), filters.clone());
        let url = std::sync::Arc::new(UrlState::new());
        let synchronizer = system.filter_synchronizer(view.clone(), filters.clone(), url.clone());

        synchronizer.initialize_filters(None).await.unwrap();
        synchronizer.apply_filter("status", json!("suspended")).await.unwrap();
        assert_eq!(url.get("users_page"), Some(json!(1)));
        assert_eq!(filters.active_filter_count(), 1);

        mutations.open_delete_modal();
        mutations.delete_all_matching_resources().await.unwrap();
        assert!(!mutations.delete_modal_open());
        // The refresh ran under the filter, which now matches nothing.
        assert!(listing.resources().is_empty());

        // Restore everything in the trash.
        let trashed = view.trashed(TrashedState::Only);
        let trash = system.listing(trashed.clone(), filters.clone());
        synchronizer.clear_selected_filters(None).await.unwrap();
        trash.refresh().await.unwrap();
        let in_trash = trash.resources().len();
        trash.select_all();
        let restorer = system.mutation_service(trashed, trash.clone(), filters);
        restorer.restore_selected_resources().await.unwrap();
        in_trash
    }
    .await;

    assert_eq!(deleted, 2);
    assert_eq!(live_ids(&system.storage, "users").await, vec![1, 2, 3, 4]);
    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn many_to_many_delete_detaches_pivot_rows_only() {
    let system = started().await;

    async {
        let view = ViewContext::new("users")
            .via("roles", 1u64, "users")
            .relationship_type("belongsToMany");
        let filters = system.filter_store("users");
        let listing = system.listing(view.clone(), filters.clone());
        listing.refresh().await.unwrap();

        let members = listing.resources();
        assert_eq!(members.len(), 2);
        assert!(members.iter().all(|member| member.id.pivot_value.is_some()));

        listing.select([1u64]);
        let mutations = system.mutation_service(view, listing.clone(), filters);
        mutations.delete_selected_resources().await.unwrap();

        assert_eq!(listing.resources().len(), 1);
    }
    .await;

    assert_eq!(live_ids(&system.storage, "users").await, vec![1, 2, 3, 4]);
    let pivots = system.storage.scan("role_user").await.unwrap();
    assert_eq!(pivots.len(), 1);
    assert_eq!(pivots[0].get_u64("user_id"), Some(3));
    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn force_delete_removes_rows_and_their_pivots() {
    let system = started().await;
    let api = system.transport();

    api.request(
        Request::new(Method::Delete, "/api/users/force")
            .param("resources", json!([3]))
            .param("trashed", ""),
    )
    .await
    .unwrap();

    assert_eq!(system.storage.find("users", 3).await.unwrap(), None);
    let pivots = system.storage.scan("role_user").await.unwrap();
    assert_eq!(pivots.iter().filter_map(|p| p.get_u64("user_id")).collect::<Vec<_>>(), vec![1]);

    drop(api);
    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn lens_all_matching_honours_search() {
    let system = started().await;
    let api = system.transport();

    let response = api
        .request(
            Request::new(Method::Delete, "/api/users/lens/active-users")
                .param("resources", "all")
                .param("search", "LIN")
                .param("trashed", ""),
        )
        .await
        .unwrap();

    assert_eq!(response.body, json!({ "deleted": 1 }));
    assert_eq!(live_ids(&system.storage, "users").await, vec![1, 2, 4]);

    drop(api);
    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn lens_narrows_listing_and_all_matching_deletes() {
    let system = started().await;
    let api = system.transport();

    let listed = api.request(Request::new(Method::Get, "/api/users/lens/active-users")).await.unwrap();
    let ids: Vec<Value> = listed.body["resources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|resource| resource["id"]["value"].clone())
        .collect();
    assert_eq!(ids, vec![json!(1), json!(3)]);

    let response = api
        .request(
            Request::new(Method::Delete, "/api/users/lens/active-users")
                .param("resources", "all")
                .param("trashed", ""),
        )
        .await
        .unwrap();

    assert_eq!(response.body, json!({ "deleted": 2 }));
    assert_eq!(live_ids(&system.storage, "users").await, vec![2, 4]);

    drop(api);
    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn a_row_attached_twice_is_listed_and_detached_per_pivot() {
    let system = started().await;
    let second = system
        .storage
        .insert("role_user", attributes(json!({ "role_id": 1, "user_id": 1 })))
        .await
        .unwrap();

    async {
        let view = ViewContext::new("users")
            .via("roles", 1u64, "users")
            .relationship_type("belongsToMany");
        let filters = system.filter_store("users");
        let listing = system.listing(view.clone(), filters.clone());
        listing.refresh().await.unwrap();

        let pivots: Vec<_> = listing
            .resources()
            .into_iter()
            .filter(|member| member.id.value == ResourceKey::Int(1))
            .map(|member| member.id.pivot_value)
            .collect();
        assert_eq!(pivots.len(), 2);
        assert_ne!(pivots[0], pivots[1]);

        let mutations = system.mutation_service(view, listing.clone(), filters);
        mutations.detach_resources(&[Resource::via_pivot(1u64, second)]).await.unwrap();
        assert_eq!(listing.resources().len(), 2);
    }
    .await;

    let remaining: Vec<u64> = system.storage.scan("role_user").await.unwrap().iter().map(|p| p.id).collect();
    assert_eq!(remaining, vec![1, 2]);
    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_resources_and_lenses_are_not_found() {
    let system = started().await;
    let api = system.transport();

    let unknown = api.request(Request::new(Method::Delete, "/api/widgets").param("resources", "all")).await;
    let lens = api.request(Request::new(Method::Get, "/api/users/lens/missing/filters")).await;
    let metric = api.request(Request::new(Method::Get, "/api/users/metrics/missing")).await;
    let route = api.request(Request::new(Method::Post, "/api/users")).await;

    for result in [unknown, lens, metric, route] {
        assert_eq!(result.map_err(|e| e.status()), Err(404));
    }

    drop(api);
    system.shutdown().await.unwrap();
}

struct Locked;

impl ResourcePolicy for Locked {
    fn view_any(&self) -> bool {
        false
    }
}

/// Only active users may be deleted.
struct ActiveOnly;

impl ResourcePolicy for ActiveOnly {
    fn delete(&self, row: &Row) -> bool {
        row.get_str("status") == Some("active")
    }
}

#[tokio::test]
async fn policies_deny_requests_and_filter_rows() {
    let system = PanelSystem::new(
        PanelConfig::default(),
        [
            ResourceSchema::new("users", "users").soft_deletes().policy(ActiveOnly),
            ResourceSchema::new("audits", "audits").policy(Locked),
        ],
    );
    seed(&system.storage).await;
    let api = system.transport();

    let denied = api.request(Request::new(Method::Get, "/api/audits/metrics")).await;
    assert_eq!(denied, Err(PanelError::AuthorizationDenied));

    api.request(Request::new(Method::Delete, "/api/users").param("resources", json!([1, 2, 3])))
        .await
        .unwrap();
    assert_eq!(live_ids(&system.storage, "users").await, vec![2, 4]);

    drop(api);
    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn metric_endpoints_attach_filters_where_requested() {
    let system = started().await;
    let api = system.transport();

    let index = api.request(Request::new(Method::Get, "/api/users/metrics")).await.unwrap();
    let metrics = index.body.as_array().unwrap();
    assert_eq!(metrics.len(), 2);
    assert_eq!(metrics[0]["uriKey"], json!("new-users"));
    assert_eq!(metrics[0]["availableFilters"][0]["class"], json!("status"));
    assert!(metrics[1].get("availableFilters").map_or(true, Value::is_null));

    let detail = api.request(Request::new(Method::Get, "/api/users/1/metrics/logins")).await.unwrap();
    assert_eq!(detail.body["uriKey"], json!("logins"));

    let not_on_detail = api.request(Request::new(Method::Get, "/api/users/1/metrics/new-users")).await;
    assert_eq!(not_on_detail.map_err(|e| e.status()), Err(404));

    drop(api);
    system.shutdown().await.unwrap();
}

struct Suspend {
    fail: bool,
}

#[async_trait]
impl PanelAction for Suspend {
    fn name(&self) -> &str {
        "Suspend"
    }

    async fn handle(&self, connection: &StorageClient, _batch_id: BatchId, models: &[Row]) -> Result<(), PanelError> {
        for model in models {
            connection
                .update("users", model.id, attributes(json!({ "status": "suspended" })))
                .await?;
        }
        if self.fail {
            return Err(PanelError::ValidationFailure("mail server unavailable".into()));
        }
        Ok(())
    }
}

#[tokio::test]
async fn actions_commit_as_one_finished_batch() {
    let system = started().await;
    let selection = Selection::Resources(vec![Resource::new(1u64), Resource::new(3u64)]);
    let context = ViewContext::new("users").query_context(None);

    let batch_id = system
        .actions
        .execute(&Suspend { fail: false }, "users", &selection, &context)
        .await
        .unwrap();

    let events = system.actions.batch_events(batch_id).await.unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.get_str("status") == Some("finished")));
    let ada = system.storage.find("users", 1).await.unwrap().unwrap();
    assert_eq!(ada.get_str("status"), Some("suspended"));

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_actions_roll_back_and_record_the_failure() {
    let system = started().await;
    let context = ViewContext::new("users").query_context(None);

    let result = system
        .actions
        .execute(&Suspend { fail: true }, "users", &Selection::AllMatching, &context)
        .await;

    assert_eq!(result, Err(PanelError::ValidationFailure("mail server unavailable".into())));
    let ada = system.storage.find("users", 1).await.unwrap().unwrap();
    assert_eq!(ada.get_str("status"), Some("active"));

    let events = system.storage.scan(ACTION_EVENTS_TABLE).await.unwrap();
    assert_eq!(events.len(), 4);
    assert!(events.iter().all(|e| e.get_str("status") == Some("failed")));
    let batch = events[0].get_str("batch_id").map(str::to_string);
    assert!(events.iter().all(|e| e.get_str("batch_id").map(str::to_string) == batch));

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn pruning_removes_only_stale_attachments() {
    let system = started().await;
    let now = chrono::Utc::now();
    for hours in [1, 30, 72] {
        system
            .storage
            .insert_at(
                "pending_attachments",
                attributes(json!({ "attachment": format!("{hours}h.png") })),
                now - chrono::Duration::hours(hours),
            )
            .await
            .unwrap();
    }

    let pruned = system.attachment_pruner().run().await.unwrap();

    assert_eq!(pruned, 2);
    assert_eq!(live_ids(&system.storage, "pending_attachments").await, vec![1]);
    system.shutdown().await.unwrap();
}
