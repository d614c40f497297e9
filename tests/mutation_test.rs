use admin_panel::mutation::{ResourceListing, ResourceMutationService};
use admin_panel::resource::{Resource, ViewContext};
use async_trait::async_trait;
use panel_framework::mock::{create_channel_transport, expect_request, MockStore, MockTransport};
use panel_framework::{EventBus, EventKind, HttpTransport, Method, PanelConfig, PanelError, Response};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A listing with a fixed selection that counts refreshes.
#[derive(Default)]
struct FakeListing {
    selected: Vec<Resource>,
    refreshes: AtomicUsize,
    fail_refresh: bool,
}

#[async_trait]
impl ResourceListing for FakeListing {
    async fn refresh(&self) -> Result<(), PanelError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh {
            return Err(PanelError::Rejected {
                status: 500,
                message: "listing unavailable".into(),
            });
        }
        Ok(())
    }

    fn selected_resources(&self) -> Vec<Resource> {
        self.selected.clone()
    }
}

/// Records every event name emitted on the bus.
fn record_events(events: &EventBus) -> (Arc<Mutex<Vec<&'static str>>>, Vec<panel_framework::Subscription>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let subscriptions = [EventKind::ResourcesDeleted, EventKind::ResourcesDetached, EventKind::ResourcesRestored]
        .into_iter()
        .map(|kind| {
            let seen = seen.clone();
            events.subscribe(kind, move |event| seen.lock().unwrap().push(event.name()))
        })
        .collect();
    (seen, subscriptions)
}

fn service(
    transport: Arc<dyn HttpTransport>,
    listing: Arc<FakeListing>,
    view: ViewContext,
    events: EventBus,
) -> ResourceMutationService {
    let store = MockStore::new();
    store.set_getter(format!("{}/currentEncodedFilters", view.resource_name), "ZmlsdGVycw==");
    ResourceMutationService::new(&PanelConfig::default(), transport, listing, Arc::new(store), events, view)
}

#[tokio::test]
async fn deleting_three_selected_rows_sends_one_request() {
    let mock = MockTransport::new();
    mock.expect(Method::Delete, "/api/users").return_ok(json!({ "deleted": 3 }));
    let listing = Arc::new(FakeListing {
        selected: vec![Resource::new(1u64), Resource::new(2u64), Resource::new(3u64)],
        ..FakeListing::default()
    });
    let events = EventBus::new();
    let (seen, _subscriptions) = record_events(&events);
    let service = service(Arc::new(mock.clone()), listing.clone(), ViewContext::new("users").search("ali"), events);

    service.open_delete_modal();
    service.delete_selected_resources().await.unwrap();

    mock.verify();
    let request = &mock.requests()[0];
    assert_eq!(request.params["resources"], json!([1, 2, 3]));
    assert_eq!(request.params["search"], json!("ali"));
    assert_eq!(request.params["filters"], json!("ZmlsdGVycw=="));
    assert_eq!(request.params["trashed"], json!(""));
    assert_eq!(*seen.lock().unwrap(), vec!["resources-deleted"]);
    assert_eq!(listing.refreshes.load(Ordering::SeqCst), 1);
    assert!(!service.delete_modal_open());
}

#[tokio::test]
async fn many_to_many_deletes_become_detaches() {
    let resources = vec![Resource::via_pivot(1u64, 9u64), Resource::new(2u64)];

    // Routed through delete.
    let routed = MockTransport::new();
    routed.expect(Method::Delete, "/api/users/detach").return_ok(json!({}));
    routed.expect(Method::Delete, "/api/users/detach").return_ok(json!({}));
    let view = ViewContext::new("users")
        .via("roles", 4u64, "users")
        .relationship_type("belongsToMany");
    let events = EventBus::new();
    let (seen, _subscriptions) = record_events(&events);
    let via_delete = service(Arc::new(routed.clone()), Arc::default(), view.clone(), events);

    via_delete.delete_resources(&resources).await.unwrap();
    via_delete.delete_all_matching_resources().await.unwrap();

    // Called directly.
    let direct = MockTransport::new();
    direct.expect(Method::Delete, "/api/users/detach").return_ok(json!({}));
    let detach = service(Arc::new(direct.clone()), Arc::default(), view, EventBus::new());
    detach.detach_resources(&resources).await.unwrap();

    routed.verify();
    direct.verify();
    assert_eq!(routed.requests()[0], direct.requests()[0]);
    assert_eq!(routed.requests()[0].params["pivots"], json!([9]));
    assert_eq!(routed.requests()[0].params["viaResourceId"], json!(4));
    assert_eq!(routed.requests()[1].params["resources"], json!("all"));
    assert_eq!(*seen.lock().unwrap(), vec!["resources-detached", "resources-detached"]);
}

#[tokio::test]
async fn force_delete_and_restore_are_never_redirected() {
    let mock = MockTransport::new();
    mock.expect(Method::Delete, "/api/users/force").return_ok(json!({}));
    mock.expect(Method::Put, "/api/users/restore").return_ok(json!({}));
    let view = ViewContext::new("users")
        .via("roles", 4u64, "users")
        .relationship_type("belongsToMany");
    let events = EventBus::new();
    let (seen, _subscriptions) = record_events(&events);
    let service = service(Arc::new(mock.clone()), Arc::default(), view, events);

    service.force_delete_resources(&[Resource::new(5u64)]).await.unwrap();
    service.restore_resources(&[Resource::new(5u64)]).await.unwrap();

    mock.verify();
    assert_eq!(*seen.lock().unwrap(), vec!["resources-deleted", "resources-restored"]);
}

#[tokio::test]
async fn all_matching_variants_use_the_lens_endpoints() {
    let mock = MockTransport::new();
    mock.expect(Method::Delete, "/api/users/lens/active-users").return_ok(json!({}));
    mock.expect(Method::Delete, "/api/users/lens/active-users/force").return_ok(json!({}));
    mock.expect(Method::Put, "/api/users/lens/active-users/restore").return_ok(json!({}));
    mock.expect(Method::Delete, "/api/users").return_ok(json!({}));
    let service = service(
        Arc::new(mock.clone()),
        Arc::default(),
        ViewContext::new("users").lens("active-users"),
        EventBus::new(),
    );

    service.delete_all_matching_resources().await.unwrap();
    service.force_delete_all_matching_resources().await.unwrap();
    service.restore_all_matching_resources().await.unwrap();
    // Explicit lists ignore the lens.
    service.delete_resources(&[Resource::new(1u64)]).await.unwrap();

    mock.verify();
    assert!(mock.requests()[..3].iter().all(|r| r.params["resources"] == json!("all")));
}

#[tokio::test]
async fn a_callback_replaces_the_refresh() {
    let mock = MockTransport::new();
    mock.expect(Method::Delete, "/api/users").return_ok(json!({}));
    let listing = Arc::new(FakeListing::default());
    let events = EventBus::new();
    let (seen, _subscriptions) = record_events(&events);
    let service = service(Arc::new(mock), listing.clone(), ViewContext::new("users"), events);
    let called = Arc::new(AtomicUsize::new(0));

    let counter = called.clone();
    service
        .delete_resources_with(&[Resource::new(1u64)], || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(called.load(Ordering::SeqCst), 1);
    assert_eq!(listing.refreshes.load(Ordering::SeqCst), 0);
    assert_eq!(*seen.lock().unwrap(), vec!["resources-deleted"]);
}

#[tokio::test]
async fn rejection_closes_the_modal_without_refresh_or_event() {
    let mock = MockTransport::new();
    mock.expect(Method::Delete, "/api/users").return_err(PanelError::AuthorizationDenied);
    mock.expect(Method::Put, "/api/users/restore").return_err(PanelError::NotFound("users".into()));
    let listing = Arc::new(FakeListing::default());
    let events = EventBus::new();
    let (seen, _subscriptions) = record_events(&events);
    let service = service(Arc::new(mock.clone()), listing.clone(), ViewContext::new("users"), events);

    service.open_delete_modal();
    let denied = service.delete_resources(&[Resource::new(1u64)]).await;
    service.open_restore_modal();
    let missing = service.restore_resources(&[Resource::new(1u64)]).await;

    assert_eq!(denied, Err(PanelError::AuthorizationDenied));
    assert_eq!(missing.map_err(|e| e.status()), Err(404));
    assert!(!service.delete_modal_open());
    assert!(!service.restore_modal_open());
    assert_eq!(listing.refreshes.load(Ordering::SeqCst), 0);
    assert!(seen.lock().unwrap().is_empty());
    mock.verify();
}

#[tokio::test]
async fn failed_refresh_still_closes_the_modal() {
    let mock = MockTransport::new();
    mock.expect(Method::Delete, "/api/users/force").return_ok(json!({}));
    let listing = Arc::new(FakeListing {
        fail_refresh: true,
        ..FakeListing::default()
    });
    let events = EventBus::new();
    let (seen, _subscriptions) = record_events(&events);
    let service = service(Arc::new(mock), listing, ViewContext::new("users"), events);

    service.open_delete_modal();
    assert!(service.force_delete_resources(&[Resource::new(1u64)]).await.is_err());

    assert!(!service.delete_modal_open());
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn a_second_mutation_waits_for_the_first_to_settle() {
    let (transport, mut requests) = create_channel_transport(4);
    let listing = Arc::new(FakeListing::default());
    let service = Arc::new(service(Arc::new(transport), listing, ViewContext::new("users"), EventBus::new()));

    service.open_delete_modal();
    let first = tokio::spawn({
        let service = service.clone();
        async move { service.delete_resources(&[Resource::new(1u64)]).await }
    });

    let (request, responder) = expect_request(&mut requests).await.expect("Expected a request");
    assert_eq!(request.url, "/api/users");
    assert!(service.delete_modal_open(), "modal stays open while in flight");

    let second = service.force_delete_resources(&[Resource::new(2u64)]).await;
    assert_eq!(second, Err(PanelError::MutationInFlight));

    responder.send(Ok(Response::ok(json!({})))).unwrap();
    first.await.unwrap().unwrap();
    assert!(!service.delete_modal_open());
}
