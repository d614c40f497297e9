//! # Mocks & Testing Guide
//!
//! Test doubles for the two client-side seams: [`HttpTransport`] and
//! [`StateStore`]. They let you exercise orchestration logic without a server
//! or a real store.
//!
//! ## When to use which
//!
//! | Double | Use Case |
//! |--------|----------|
//! | [`MockTransport`] | Assert the exact request shape, inject server rejections |
//! | [`create_channel_transport`] | Hold a request in flight and answer it by hand |
//! | [`MockStore`] | Record dispatch/commit order, serve and push getter values, reject dispatches |
//! | `LocalApi` (app crate) | Full flows against the in-memory storage engine |
//!
//! ## Example
//!
//! ```rust
//! use panel_framework::mock::MockTransport;
//! use panel_framework::{HttpTransport, Method, PanelError, Request};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mock = MockTransport::new();
//!     mock.expect(Method::Delete, "/api/users").return_ok(json!({}));
//!     mock.expect(Method::Put, "/api/users/restore")
//!         .return_err(PanelError::AuthorizationDenied);
//!
//!     let ok = mock.request(Request::new(Method::Delete, "/api/users")).await;
//!     assert!(ok.is_ok());
//!
//!     let denied = mock.request(Request::new(Method::Put, "/api/users/restore")).await;
//!     assert_eq!(denied, Err(PanelError::AuthorizationDenied));
//!
//!     mock.verify();
//! }
//! ```

use crate::error::PanelError;
use crate::store::StateStore;
use crate::transport::{HttpTransport, Method, Request, Response};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, watch};

// =============================================================================
// EXPECTATION BUILDER API
// =============================================================================

struct Expectation {
    method: Method,
    url: String,
    response: Result<Response, PanelError>,
}

/// A transport that answers from a queue of expectations, in order.
#[derive(Clone, Default)]
pub struct MockTransport {
    expectations: Arc<Mutex<VecDeque<Expectation>>>,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expects the next request to be `method url`.
    pub fn expect(&self, method: Method, url: impl Into<String>) -> ExpectationBuilder {
        ExpectationBuilder {
            method,
            url: url.into(),
            expectations: self.expectations.clone(),
        }
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    /// Panics unless every expectation was consumed.
    pub fn verify(&self) {
        let exps = self.expectations.lock().unwrap();
        if !exps.is_empty() {
            panic!("Not all expectations were met. {} remaining", exps.len());
        }
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn request(&self, request: Request) -> Result<Response, PanelError> {
        let expectation = self.expectations.lock().unwrap().pop_front();
        let Some(expectation) = expectation else {
            panic!("Unexpected request: {} {}", request.method, request.url);
        };
        if expectation.method != request.method || expectation.url != request.url {
            panic!(
                "Expectation mismatch: expected {} {}, got {} {}",
                expectation.method, expectation.url, request.method, request.url
            );
        }
        self.requests.lock().unwrap().push(request);
        expectation.response
    }
}

pub struct ExpectationBuilder {
    method: Method,
    url: String,
    expectations: Arc<Mutex<VecDeque<Expectation>>>,
}

impl ExpectationBuilder {
    pub fn return_ok(self, body: Value) {
        self.push(Ok(Response::ok(body)));
    }

    pub fn return_no_content(self) {
        self.push(Ok(Response::no_content()));
    }

    pub fn return_err(self, error: PanelError) {
        self.push(Err(error));
    }

    fn push(self, response: Result<Response, PanelError>) {
        self.expectations.lock().unwrap().push_back(Expectation {
            method: self.method,
            url: self.url,
            response,
        });
    }
}

// =============================================================================
// CHANNEL TRANSPORT
// =============================================================================

/// Answers a request held by [`expect_request`].
pub type Responder = oneshot::Sender<Result<Response, PanelError>>;

/// A request waiting for the test to answer it.
#[derive(Debug)]
pub struct PendingRequest {
    pub request: Request,
    pub respond_to: Responder,
}

/// A transport whose requests arrive on a channel the test controls.
#[derive(Clone)]
pub struct ChannelTransport {
    sender: mpsc::Sender<PendingRequest>,
}

#[async_trait]
impl HttpTransport for ChannelTransport {
    async fn request(&self, request: Request) -> Result<Response, PanelError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(PendingRequest { request, respond_to })
            .await
            .map_err(|_| PanelError::Rejected {
                status: 503,
                message: "transport closed".into(),
            })?;
        response.await.map_err(|_| PanelError::Rejected {
            status: 503,
            message: "request abandoned".into(),
        })?
    }
}

/// Creates a channel transport and the receiver its requests arrive on.
pub fn create_channel_transport(buffer_size: usize) -> (ChannelTransport, mpsc::Receiver<PendingRequest>) {
    let (sender, receiver) = mpsc::channel(buffer_size);
    (ChannelTransport { sender }, receiver)
}

/// Waits for the next request on a channel transport.
pub async fn expect_request(receiver: &mut mpsc::Receiver<PendingRequest>) -> Option<(Request, Responder)> {
    receiver
        .recv()
        .await
        .map(|pending| (pending.request, pending.respond_to))
}

// =============================================================================
// MOCK STORE
// =============================================================================

/// A call received by [`MockStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Dispatch { action: String, payload: Value },
    Commit { mutation: String, payload: Value },
}

#[derive(Default)]
struct MockStoreState {
    getters: HashMap<String, Value>,
    calls: Vec<StoreCall>,
    rejected_action: Option<String>,
    watchers: HashMap<String, watch::Sender<Value>>,
}

/// A store that records calls and serves fixed getter values.
#[derive(Clone, Default)]
pub struct MockStore {
    state: Arc<Mutex<MockStoreState>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a getter's value, notifying anyone watching it.
    pub fn set_getter(&self, key: impl Into<String>, value: impl Into<Value>) {
        let (key, value) = (key.into(), value.into());
        let mut state = self.state.lock().unwrap();
        if let Some(watcher) = state.watchers.get(&key) {
            watcher.send_replace(value.clone());
        }
        state.getters.insert(key, value);
    }

    /// Makes every dispatch of `action` fail with [`PanelError::StoreRejected`].
    pub fn reject_dispatch(&self, action: impl Into<String>) {
        self.state.lock().unwrap().rejected_action = Some(action.into());
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Names of dispatched actions, in order.
    pub fn dispatched(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::Dispatch { action, .. } => Some(action),
                StoreCall::Commit { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl StateStore for MockStore {
    fn get(&self, key: &str) -> Value {
        self.state.lock().unwrap().getters.get(key).cloned().unwrap_or(Value::Null)
    }

    async fn dispatch(&self, action: &str, payload: Value) -> Result<(), PanelError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::Dispatch {
            action: action.to_string(),
            payload,
        });
        match &state.rejected_action {
            Some(rejected) if rejected == action => Err(PanelError::StoreRejected(action.to_string())),
            _ => Ok(()),
        }
    }

    fn commit(&self, mutation: &str, payload: Value) {
        self.state.lock().unwrap().calls.push(StoreCall::Commit {
            mutation: mutation.to_string(),
            payload,
        });
    }

    fn watch(&self, key: &str) -> Option<watch::Receiver<Value>> {
        let mut state = self.state.lock().unwrap();
        let current = state.getters.get(key).cloned().unwrap_or(Value::Null);
        let watcher = state
            .watchers
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(current).0);
        Some(watcher.subscribe())
    }
}
