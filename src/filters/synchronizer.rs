use super::query_string::QueryStringLayer;
use crate::resource::ViewContext;
use panel_framework::{EventBus, PanelError, PanelEvent, Params, StateStore};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

/// Keeps a view's filter definitions, the store's encoded filters and the
/// URL query string converged.
///
/// The encoded filter string is opaque here: it is read from the store,
/// compared and forwarded, never parsed. Once loaded, changes the store pushes
/// for it are announced without waiting for a method call here.
pub struct FilterStateSynchronizer {
    view: ViewContext,
    store: Arc<dyn StateStore>,
    query_string: Arc<dyn QueryStringLayer>,
    events: EventBus,
    initial_encoded_filters: Option<String>,
    /// Held for the whole load so concurrent callers load once.
    loading: tokio::sync::Mutex<()>,
    filter_has_loaded: AtomicBool,
    filter_is_active: AtomicBool,
    last_encoded: Arc<Mutex<String>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl FilterStateSynchronizer {
    pub fn new(
        view: ViewContext,
        store: Arc<dyn StateStore>,
        query_string: Arc<dyn QueryStringLayer>,
        events: EventBus,
    ) -> Self {
        let last_encoded = store.get_string(&format!("{}/currentEncodedFilters", view.resource_name));
        Self {
            view,
            store,
            query_string,
            events,
            initial_encoded_filters: None,
            loading: tokio::sync::Mutex::new(()),
            filter_has_loaded: AtomicBool::new(false),
            filter_is_active: AtomicBool::new(false),
            last_encoded: Arc::new(Mutex::new(last_encoded)),
            watcher: Mutex::new(None),
        }
    }

    /// Filter values read from the URL when the view loaded.
    pub fn with_initial_encoded_filters(mut self, encoded: impl Into<String>) -> Self {
        self.initial_encoded_filters = Some(encoded.into()).filter(|e| !e.is_empty());
        self
    }

    pub fn filter_parameter(&self) -> String {
        format!("{}_filter", self.view.resource_name)
    }

    pub fn page_parameter(&self) -> String {
        format!("{}_page", self.view.resource_name)
    }

    pub fn encoded_filters(&self) -> String {
        self.store.get_string(&self.key("currentEncodedFilters"))
    }

    pub fn has_loaded(&self) -> bool {
        self.filter_has_loaded.load(Ordering::SeqCst)
    }

    fn key(&self, name: &str) -> String {
        format!("{}/{}", self.view.resource_name, name)
    }

    /// Loads the view's filters once; later calls do nothing. A call made while
    /// another is loading waits for it, and retries only if that load failed.
    #[instrument(skip(self), fields(resource = %self.view.resource_name))]
    pub async fn initialize_filters(&self, lens: Option<&str>) -> Result<(), PanelError> {
        let _loading = self.loading.lock().await;
        if self.has_loaded() {
            debug!("Filters already loaded");
            return Ok(());
        }

        self.store.commit(&self.key("clearFilters"), Value::Null);
        self.store.dispatch(&self.key("fetchFilters"), self.fetch_scope(lens)).await?;
        self.initialize_state(lens).await?;

        self.filter_has_loaded.store(true, Ordering::SeqCst);
        info!("Filters initialized");
        self.observe_encoded_filters();
        self.watch_encoded_filters();
        Ok(())
    }

    /// Announces every change the store pushes for the encoded filters.
    fn watch_encoded_filters(&self) {
        let Some(mut changes) = self.store.watch(&self.key("currentEncodedFilters")) else {
            debug!("Store does not push encoded filter changes");
            return;
        };
        let last_encoded = self.last_encoded.clone();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let current = match &*changes.borrow_and_update() {
                    Value::String(encoded) => encoded.clone(),
                    _ => String::new(),
                };
                announce_if_changed(&last_encoded, &events, current);
            }
        });
        let previous = self.watcher.lock().unwrap_or_else(PoisonError::into_inner).replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    async fn initialize_state(&self, lens: Option<&str>) -> Result<(), PanelError> {
        match &self.initial_encoded_filters {
            Some(encoded) => {
                self.store
                    .dispatch(
                        &self.key("initializeCurrentFilterValuesFromQueryString"),
                        Value::String(encoded.clone()),
                    )
                    .await
            }
            None => {
                self.store
                    .dispatch(&self.key("resetFilterState"), self.reset_payload(lens))
                    .await
            }
        }
    }

    /// Only the scope fields that are set.
    fn fetch_scope(&self, lens: Option<&str>) -> Value {
        let mut scope = Params::new();
        let mut put = |name: &str, value: Option<Value>| {
            if let Some(value) = value {
                scope.insert(name.to_string(), value);
            }
        };
        put("resourceName", Some(Value::String(self.view.resource_name.clone())));
        put("viaResource", self.view.via_resource.clone().map(Value::String));
        put("viaResourceId", self.view.via_resource_id.clone().map(Value::from));
        put("viaRelationship", self.view.via_relationship.clone().map(Value::String));
        put("relationshipType", self.view.relationship_type.clone().map(Value::String));
        put("lens", lens.map(Value::from));
        Value::Object(scope)
    }

    fn reset_payload(&self, lens: Option<&str>) -> Value {
        match lens {
            Some(lens) => json!({ "resourceName": self.view.resource_name, "lens": lens }),
            None => json!({ "resourceName": self.view.resource_name }),
        }
    }

    /// Mirrors a filter change into the URL once any filter has been applied,
    /// sending pagination back to the first page.
    pub fn filter_changed(&self) {
        let filters_are_applied = self.store.get_bool(&self.key("filtersAreApplied"));

        if filters_are_applied || self.filter_is_active.load(Ordering::SeqCst) {
            self.filter_is_active.store(true, Ordering::SeqCst);
            self.push(json!(1), Value::String(self.encoded_filters()));
        }
        self.observe_encoded_filters();
    }

    /// Sets one filter's value and propagates the change.
    pub async fn apply_filter(&self, filter_class: &str, value: Value) -> Result<(), PanelError> {
        self.store
            .dispatch(
                &self.key("updateFilterState"),
                json!({ "filterClass": filter_class, "value": value }),
            )
            .await?;
        self.filter_changed();
        Ok(())
    }

    /// Resets every filter to its default and clears the filter parameter.
    #[instrument(skip(self), fields(resource = %self.view.resource_name))]
    pub async fn clear_selected_filters(&self, lens: Option<&str>) -> Result<(), PanelError> {
        self.store
            .dispatch(&self.key("resetFilterState"), self.reset_payload(lens))
            .await?;

        self.push(json!(1), Value::String(String::new()));
        self.events.emit(PanelEvent::FilterReset);
        self.observe_encoded_filters();
        Ok(())
    }

    /// Announces `filter-changed` if the encoded filters moved since the last look.
    pub fn observe_encoded_filters(&self) {
        announce_if_changed(&self.last_encoded, &self.events, self.encoded_filters());
    }

    fn push(&self, page: Value, filter: Value) {
        let mut updates = Params::new();
        updates.insert(self.page_parameter(), page);
        updates.insert(self.filter_parameter(), filter);
        self.query_string.update_query_string(updates);
    }
}

impl Drop for FilterStateSynchronizer {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            watcher.abort();
        }
    }
}

/// Emits `FilterChanged` unless `current` is the value last announced.
fn announce_if_changed(last_encoded: &Mutex<String>, events: &EventBus, current: String) {
    {
        let mut last = last_encoded.lock().unwrap_or_else(PoisonError::into_inner);
        if *last == current {
            return;
        }
        *last = current.clone();
    }
    events.emit(PanelEvent::FilterChanged(current));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::UrlState;
    use crate::filters::FilterStore;
    use panel_framework::mock::{create_channel_transport, expect_request, MockStore, StoreCall};
    use panel_framework::{EventKind, PanelConfig, Response};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn synchronizer(store: &MockStore, url: &Arc<UrlState>) -> FilterStateSynchronizer {
        FilterStateSynchronizer::new(
            ViewContext::new("users").via("roles", 3u64, "users"),
            Arc::new(store.clone()),
            url.clone(),
            EventBus::new(),
        )
    }

    #[tokio::test]
    async fn initialization_runs_once() {
        let store = MockStore::new();
        let url = Arc::new(UrlState::new());
        let sync = synchronizer(&store, &url);

        sync.initialize_filters(None).await.unwrap();
        sync.initialize_filters(None).await.unwrap();

        assert_eq!(store.dispatched(), vec!["users/fetchFilters", "users/resetFilterState"]);
        let calls = store.calls();
        assert_eq!(
            calls[0],
            StoreCall::Commit {
                mutation: "users/clearFilters".into(),
                payload: Value::Null
            }
        );
        assert_eq!(
            calls[1],
            StoreCall::Dispatch {
                action: "users/fetchFilters".into(),
                payload: json!({
                    "resourceName": "users",
                    "viaResource": "roles",
                    "viaResourceId": 3,
                    "viaRelationship": "users"
                })
            }
        );
    }

    #[tokio::test]
    async fn initial_encoded_filters_take_precedence_over_defaults() {
        let store = MockStore::new();
        let url = Arc::new(UrlState::new());
        let sync = synchronizer(&store, &url).with_initial_encoded_filters("W10=");

        sync.initialize_filters(Some("active-users")).await.unwrap();

        assert_eq!(
            store.dispatched(),
            vec!["users/fetchFilters", "users/initializeCurrentFilterValuesFromQueryString"]
        );
    }

    #[tokio::test]
    async fn rejected_fetch_leaves_the_view_unloaded() {
        let store = MockStore::new();
        store.reject_dispatch("users/fetchFilters");
        let url = Arc::new(UrlState::new());
        let sync = synchronizer(&store, &url);

        assert!(sync.initialize_filters(None).await.is_err());
        assert!(!sync.has_loaded());
    }

    #[tokio::test]
    async fn untouched_filters_leave_pagination_alone() {
        let store = MockStore::new();
        store.set_getter("users/filtersAreApplied", false);
        let url = Arc::new(UrlState::new());
        let sync = synchronizer(&store, &url);

        sync.filter_changed();
        assert!(url.history().is_empty());

        store.set_getter("users/filtersAreApplied", true);
        store.set_getter("users/currentEncodedFilters", "abc");
        sync.filter_changed();
        assert_eq!(url.get("users_page"), Some(json!(1)));
        assert_eq!(url.get("users_filter"), Some(json!("abc")));

        // Once active, clearing the last filter still resets the page.
        store.set_getter("users/filtersAreApplied", false);
        store.set_getter("users/currentEncodedFilters", "");
        sync.filter_changed();
        assert_eq!(url.history().len(), 2);
        assert_eq!(url.get("users_filter"), Some(json!("")));
    }

    #[tokio::test]
    async fn clearing_resets_the_url_and_announces_once() {
        let store = MockStore::new();
        let url = Arc::new(UrlState::new());
        url.update_query_string(Params::from_iter([
            ("users_page".to_string(), json!(4)),
            ("users_filter".to_string(), json!("abc")),
        ]));
        let sync = synchronizer(&store, &url);
        let resets = Arc::new(AtomicUsize::new(0));
        let counter = resets.clone();
        let _subscription = sync.events.subscribe(EventKind::FilterReset, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sync.clear_selected_filters(Some("my-lens")).await.unwrap();

        assert_eq!(url.get("users_page"), Some(json!(1)));
        assert_eq!(url.get("users_filter"), Some(json!("")));
        assert_eq!(resets.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.calls(),
            vec![StoreCall::Dispatch {
                action: "users/resetFilterState".into(),
                payload: json!({ "resourceName": "users", "lens": "my-lens" })
            }]
        );
    }

    #[tokio::test]
    async fn encoded_changes_are_announced() {
        let store = MockStore::new();
        let url = Arc::new(UrlState::new());
        let sync = synchronizer(&store, &url);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _subscription = sync.events.on_filter_changed(move |value| sink.lock().unwrap().push(value.to_string()));

        sync.observe_encoded_filters();
        store.set_getter("users/currentEncodedFilters", "abc");
        sync.observe_encoded_filters();
        sync.observe_encoded_filters();

        assert_eq!(*seen.lock().unwrap(), vec!["abc".to_string()]);
    }

    #[tokio::test]
    async fn store_side_changes_are_announced_once_loaded() {
        let store = MockStore::new();
        let url = Arc::new(UrlState::new());
        let sync = synchronizer(&store, &url);
        let (sender, mut announced) = tokio::sync::mpsc::unbounded_channel();
        let _subscription = sync.events.on_filter_changed(move |value| {
            let _ = sender.send(value.to_string());
        });

        sync.initialize_filters(None).await.unwrap();
        store.set_getter("users/currentEncodedFilters", "abc");

        let first = tokio::time::timeout(Duration::from_secs(1), announced.recv()).await.unwrap();
        assert_eq!(first.as_deref(), Some("abc"));

        // Looking again at the value already announced stays quiet.
        sync.observe_encoded_filters();
        tokio::task::yield_now().await;
        assert!(announced.try_recv().is_err());
    }

    #[tokio::test]
    async fn concurrent_initialization_loads_once() {
        let (transport, mut requests) = create_channel_transport(4);
        let store = Arc::new(FilterStore::new("users", &PanelConfig::default(), Arc::new(transport)));
        let sync = Arc::new(FilterStateSynchronizer::new(
            ViewContext::new("users"),
            store,
            Arc::new(UrlState::new()),
            EventBus::new(),
        ));

        let first = tokio::spawn({
            let sync = sync.clone();
            async move { sync.initialize_filters(None).await }
        });
        let second = tokio::spawn({
            let sync = sync.clone();
            async move { sync.initialize_filters(None).await }
        });

        // One fetch and the reset's re-fetch, for one load.
        for _ in 0..2 {
            let (request, responder) = expect_request(&mut requests).await.expect("Expected a request");
            assert_eq!(request.url, "/api/users/filters");
            responder.send(Ok(Response::ok(json!([])))).unwrap();
        }
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        assert!(sync.has_loaded());
        assert!(requests.try_recv().is_err());
    }
}
