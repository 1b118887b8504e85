//! An in-process fake of a storage array's management API.
//!
//! ```
//! use storebench_test::server::TestArray;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let array = TestArray::new().await;
//!     let endpoint = array.url();
//!     // connect a ManagementSession to the endpoint...
//!     assert!(array.state().is_empty());
//! }
//! ```
//!
//! The fake keeps all resources in memory and enforces the rules a real array applies during
//! teardown: file shares and buckets must be destroyed before they can be eradicated, and accounts
//! and users cannot be deleted while something still depends on them.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{Json, Router};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use serde_json::{Value, json};

pub use axum::http::Method;

/// The API token [`TestArray::new`] accepts.
pub const API_TOKEN: &str = "test-api-token";

/// A network interface advertised by the fake array.
#[derive(Clone, Debug)]
pub struct TestInterface {
    /// Interface name.
    pub name: String,
    /// IP address.
    pub address: String,
    /// Advertised services, e.g. `data`.
    pub services: Vec<String>,
    /// Subnet name.
    pub subnet: String,
}

impl TestInterface {
    /// An interface serving client data traffic.
    pub fn data(name: &str, address: &str, subnet: &str) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            services: vec!["data".into()],
            subnet: subnet.into(),
        }
    }

    /// An interface serving management traffic only.
    pub fn management(name: &str, address: &str, subnet: &str) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            services: vec!["management".into()],
            subnet: subnet.into(),
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "address": self.address,
            "services": self.services,
            "subnet": {"name": self.subnet},
            "type": "vip",
        })
    }
}

/// A file share on the fake array.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TestFileShare {
    /// Whether the NFS export is enabled.
    pub nfs_enabled: bool,
    /// Whether the share is soft-deleted.
    pub destroyed: bool,
}

/// A bucket on the fake array.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TestBucket {
    /// The owning account.
    pub account: String,
    /// Whether the bucket is soft-deleted.
    pub destroyed: bool,
}

/// Everything the fake array knows.
#[derive(Debug, Default)]
pub struct ArrayState {
    /// The accepted API token.
    pub api_token: String,
    /// REST API versions offered during discovery.
    pub versions: Vec<String>,
    /// Network interfaces, in listing order.
    pub interfaces: Vec<TestInterface>,
    /// Maximum number of interfaces per listed page. Everything on one page if unset.
    pub page_size: Option<usize>,
    /// Session tokens that are currently logged in.
    pub sessions: BTreeSet<String>,
    /// Number of successful logins.
    pub logins: usize,
    /// Number of logouts of a valid session.
    pub logouts: usize,
    /// File shares by name.
    pub file_shares: BTreeMap<String, TestFileShare>,
    /// Object store account names.
    pub accounts: BTreeSet<String>,
    /// Object store users, as `<account>/<user>`.
    pub users: BTreeSet<String>,
    /// Access key ids mapped to their user.
    pub access_keys: BTreeMap<String, String>,
    /// Buckets by name.
    pub buckets: BTreeMap<String, TestBucket>,
    /// Requests answered with `500`, as `(method, resource)`.
    pub failing: HashSet<(Method, String)>,
    key_counter: usize,
}

impl ArrayState {
    /// An array with two subnets, each with one data interface, plus a management interface.
    pub fn with_two_subnets() -> Self {
        Self {
            api_token: API_TOKEN.into(),
            versions: ["1.0", "1.2", "1.8", "1.11"].map(String::from).into(),
            interfaces: vec![
                TestInterface::management("mgmt0", "10.0.0.10", "mgmt"),
                TestInterface::data("data1", "10.0.1.5", "net1"),
                TestInterface::data("data2", "10.0.2.5", "net2"),
            ],
            ..Default::default()
        }
    }

    /// Makes every `method` request on `resource` fail with an internal server error.
    pub fn fail(&mut self, method: Method, resource: &str) {
        self.failing.insert((method, resource.to_owned()));
    }

    /// Returns `true` if no transient resource exists on the array.
    pub fn is_empty(&self) -> bool {
        self.file_shares.is_empty()
            && self.accounts.is_empty()
            && self.users.is_empty()
            && self.access_keys.is_empty()
            && self.buckets.is_empty()
    }
}

type SharedState = Arc<Mutex<ArrayState>>;

/// An in-process management API server for use in integration tests.
///
/// It listens on a random available port on localhost and is shut down when dropped.
#[derive(Debug)]
pub struct TestArray {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    state: SharedState,
}

impl TestArray {
    /// Starts a fake array as returned by [`ArrayState::with_two_subnets`].
    pub async fn new() -> Self {
        Self::with_state(ArrayState::with_two_subnets()).await
    }

    /// Starts a fake array with the given initial state.
    pub async fn with_state(state: ArrayState) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let state = Arc::new(Mutex::new(state));
        let app = Router::new()
            .route("/api/api_version", get(api_version))
            .route("/api/login", post(login))
            .route("/api/logout", post(logout))
            .route("/api/{version}/{resource}", any(resource))
            .with_state(Arc::clone(&state));

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            handle,
            socket,
            state,
        }
    }

    /// The management endpoint to connect to.
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.socket.port())
    }

    /// Locks and returns the array's state for inspection or modification.
    pub fn state(&self) -> MutexGuard<'_, ArrayState> {
        self.state.lock().unwrap()
    }
}

impl Drop for TestArray {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn api_version(State(state): State<SharedState>) -> Response {
    let state = state.lock().unwrap();
    Json(json!({ "versions": state.versions })).into_response()
}

async fn login(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let mut state = state.lock().unwrap();
    let token = headers.get("api-token").and_then(|v| v.to_str().ok());
    if token != Some(state.api_token.as_str()) {
        return error(StatusCode::UNAUTHORIZED, "invalid API token");
    }

    state.logins += 1;
    let session = format!("session-{}", state.logins);
    state.sessions.insert(session.clone());

    let body = Json(json!({ "items": [{ "username": "pureuser" }] }));
    (StatusCode::OK, [("x-auth-token", session)], body).into_response()
}

async fn logout(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let mut state = state.lock().unwrap();
    let token = headers.get("x-auth-token").and_then(|v| v.to_str().ok());
    if token.is_some_and(|token| state.sessions.remove(token)) {
        state.logouts += 1;
    }
    StatusCode::OK.into_response()
}

async fn resource(
    State(state): State<SharedState>,
    Path((version, resource)): Path<(String, String)>,
    method: Method,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut state = state.lock().unwrap();

    let token = headers.get("x-auth-token").and_then(|v| v.to_str().ok());
    if !token.is_some_and(|token| state.sessions.contains(token)) {
        return error(StatusCode::FORBIDDEN, "not logged in");
    }
    if !state.versions.contains(&version) {
        return error(StatusCode::NOT_FOUND, "unknown API version");
    }
    if state.failing.contains(&(method.clone(), resource.clone())) {
        return error(StatusCode::INTERNAL_SERVER_ERROR, "injected failure");
    }

    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let name = query.get("names").cloned().unwrap_or_default();

    match (method, resource.as_str()) {
        (Method::GET, "network-interfaces") => list_interfaces(&state, &query),
        (Method::GET, "file-systems") => match state.file_shares.get(&name) {
            Some(share) => items_response(vec![file_share_json(&name, share)]),
            None => error(StatusCode::BAD_REQUEST, "file system does not exist"),
        },
        (Method::POST, "file-systems") => {
            let name = body["name"].as_str().unwrap_or_default().to_owned();
            if state.file_shares.contains_key(&name) {
                return error(StatusCode::CONFLICT, "file system already exists");
            }
            let share = TestFileShare {
                nfs_enabled: body["nfs"]["enabled"].as_bool().unwrap_or(false),
                destroyed: false,
            };
            let item = file_share_json(&name, &share);
            state.file_shares.insert(name, share);
            items_response(vec![item])
        }
        (Method::PATCH, "file-systems") => {
            let Some(share) = state.file_shares.get_mut(&name) else {
                return error(StatusCode::BAD_REQUEST, "file system does not exist");
            };
            if let Some(enabled) = body["nfs"]["enabled"].as_bool() {
                share.nfs_enabled = enabled;
            }
            if let Some(destroyed) = body["destroyed"].as_bool() {
                share.destroyed = destroyed;
            }
            let item = file_share_json(&name, share);
            items_response(vec![item])
        }
        (Method::DELETE, "file-systems") => match state.file_shares.get(&name) {
            None => error(StatusCode::BAD_REQUEST, "file system does not exist"),
            Some(share) if !share.destroyed => {
                error(StatusCode::BAD_REQUEST, "file system must be destroyed first")
            }
            Some(_) => {
                state.file_shares.remove(&name);
                StatusCode::OK.into_response()
            }
        },
        (Method::POST, "object-store-accounts") => {
            if !state.accounts.insert(name.clone()) {
                return error(StatusCode::CONFLICT, "account already exists");
            }
            items_response(vec![json!({ "name": name })])
        }
        (Method::DELETE, "object-store-accounts") => {
            let prefix = format!("{name}/");
            let in_use = state.users.iter().any(|user| user.starts_with(&prefix))
                || state.buckets.values().any(|bucket| bucket.account == name);
            if in_use {
                return error(StatusCode::BAD_REQUEST, "account is not empty");
            }
            if !state.accounts.remove(&name) {
                return error(StatusCode::BAD_REQUEST, "account does not exist");
            }
            StatusCode::OK.into_response()
        }
        (Method::POST, "object-store-users") => {
            let account = name.split('/').next().unwrap_or_default();
            if !state.accounts.contains(account) {
                return error(StatusCode::BAD_REQUEST, "account does not exist");
            }
            if !state.users.insert(name.clone()) {
                return error(StatusCode::CONFLICT, "user already exists");
            }
            items_response(vec![json!({ "name": name })])
        }
        (Method::DELETE, "object-store-users") => {
            if state.access_keys.values().any(|user| *user == name) {
                return error(StatusCode::BAD_REQUEST, "user still has access keys");
            }
            if !state.users.remove(&name) {
                return error(StatusCode::BAD_REQUEST, "user does not exist");
            }
            StatusCode::OK.into_response()
        }
        (Method::POST, "object-store-access-keys") => {
            let user = body["user"]["name"].as_str().unwrap_or_default().to_owned();
            if !state.users.contains(&user) {
                return error(StatusCode::BAD_REQUEST, "user does not exist");
            }
            state.key_counter += 1;
            let key = format!("PSFBTESTKEY{}", state.key_counter);
            state.access_keys.insert(key.clone(), user.clone());
            items_response(vec![json!({
                "name": key,
                "secret_access_key": format!("secret-{}", state.key_counter),
                "user": { "name": user },
                "enabled": true,
            })])
        }
        (Method::DELETE, "object-store-access-keys") => {
            if state.access_keys.remove(&name).is_none() {
                return error(StatusCode::BAD_REQUEST, "access key does not exist");
            }
            StatusCode::OK.into_response()
        }
        (Method::POST, "buckets") => {
            let account = body["account"]["name"].as_str().unwrap_or_default().to_owned();
            if !state.accounts.contains(&account) {
                return error(StatusCode::BAD_REQUEST, "account does not exist");
            }
            if state.buckets.contains_key(&name) {
                return error(StatusCode::CONFLICT, "bucket already exists");
            }
            state.buckets.insert(
                name.clone(),
                TestBucket {
                    account: account.clone(),
                    destroyed: false,
                },
            );
            items_response(vec![json!({ "name": name, "account": { "name": account } })])
        }
        (Method::PATCH, "buckets") => {
            let Some(bucket) = state.buckets.get_mut(&name) else {
                return error(StatusCode::BAD_REQUEST, "bucket does not exist");
            };
            if let Some(destroyed) = body["destroyed"].as_bool() {
                bucket.destroyed = destroyed;
            }
            items_response(vec![json!({ "name": name, "destroyed": bucket.destroyed })])
        }
        (Method::DELETE, "buckets") => match state.buckets.get(&name) {
            None => error(StatusCode::BAD_REQUEST, "bucket does not exist"),
            Some(bucket) if !bucket.destroyed => {
                error(StatusCode::BAD_REQUEST, "bucket must be destroyed first")
            }
            Some(_) => {
                state.buckets.remove(&name);
                StatusCode::OK.into_response()
            }
        },
        _ => error(StatusCode::NOT_FOUND, "unknown resource"),
    }
}

fn list_interfaces(state: &ArrayState, query: &HashMap<String, String>) -> Response {
    let start = query
        .get("continuation_token")
        .and_then(|token| token.parse::<usize>().ok())
        .unwrap_or(0);
    let total = state.interfaces.len();
    let end = match state.page_size {
        Some(size) => (start + size).min(total),
        None => total,
    };

    let items: Vec<_> = state
        .interfaces
        .get(start..end)
        .unwrap_or_default()
        .iter()
        .map(TestInterface::to_json)
        .collect();
    let continuation = (end < total).then(|| end.to_string());

    Json(json!({
        "pagination_info": {
            "total_item_count": total,
            "continuation_token": continuation,
        },
        "items": items,
    }))
    .into_response()
}

fn file_share_json(name: &str, share: &TestFileShare) -> Value {
    json!({
        "name": name,
        "destroyed": share.destroyed,
        "nfs": { "enabled": share.nfs_enabled, "v3_enabled": true },
    })
}

fn items_response(items: Vec<Value>) -> Response {
    Json(json!({
        "pagination_info": { "total_item_count": items.len() },
        "items": items,
    }))
    .into_response()
}

fn error(status: StatusCode, message: &str) -> Response {
    let body = json!({ "errors": [{ "message": message }] });
    (status, Json(body)).into_response()
}

