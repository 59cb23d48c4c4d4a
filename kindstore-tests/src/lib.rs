/// Test utilities for kindstore integration tests
///
/// `MockDatastore` stands in for both the token endpoint and the entity
/// service. Responses are scripted per REST method; unscripted calls get a
/// plausible default so each test only spells out what it asserts on.

use async_trait::async_trait;
use kindstore_client::{
    Claims, Client, ClientConfig, HttpRequest, HttpResponse, ServiceAccount, TokenSigner, Transport,
};
use parking_lot::Mutex;
use serde_json::{json, Value as Json};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub const PROJECT: &str = "test-project";
pub const BASE_URL: &str = "http://datastore.test/v1";
pub const TOKEN_URI: &str = "http://oauth.test/token";

/// Scripted stand-in for the remote services
#[derive(Default)]
pub struct MockDatastore {
    scripted: Mutex<HashMap<String, VecDeque<HttpResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
    holds: Mutex<HashMap<String, Arc<Notify>>>,
    tokens_issued: AtomicUsize,
    transactions: AtomicUsize,
}

impl MockDatastore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a response for the next call to `method` (e.g. "commit")
    pub fn script(&self, method: &str, response: HttpResponse) {
        self.scripted
            .lock()
            .entry(method.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn script_ok(&self, method: &str, body: Json) {
        self.script(method, HttpResponse::ok(body));
    }

    /// Block calls to `method` until the returned handle is notified
    pub fn hold(&self, method: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.holds.lock().insert(method.to_string(), Arc::clone(&notify));
        notify
    }

    /// Entity-service requests in the order they were sent
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// JSON bodies sent to `method`
    pub fn bodies(&self, method: &str) -> Vec<Json> {
        self.requests
            .lock()
            .iter()
            .filter(|request| method_of(&request.url) == method)
            .filter_map(|request| request.json_body().cloned())
            .collect()
    }

    pub fn calls(&self, method: &str) -> usize {
        self.bodies(method).len()
    }

    pub fn tokens_issued(&self) -> usize {
        self.tokens_issued.load(Ordering::SeqCst)
    }

    fn default_response(&self, method: &str, body: Option<&Json>) -> HttpResponse {
        match method {
            "beginTransaction" => {
                let n = self.transactions.fetch_add(1, Ordering::SeqCst) + 1;
                HttpResponse::ok(json!({ "transaction": format!("tx-{}", n) }))
            }
            "rollback" | "reserveIds" => HttpResponse::ok(json!({})),
            "commit" => {
                let count = body
                    .and_then(|body| body.get("mutations"))
                    .and_then(Json::as_array)
                    .map(Vec::len)
                    .unwrap_or(0);
                let results: Vec<Json> = (0..count).map(|_| json!({ "version": "1" })).collect();
                HttpResponse::ok(json!({ "mutationResults": results }))
            }
            "lookup" => HttpResponse::ok(json!({})),
            "runQuery" => HttpResponse::ok(json!({ "batch": { "moreResults": "NO_MORE_RESULTS" } })),
            other => HttpResponse::new(404, json!({ "error": format!("no script for {}", other) })),
        }
    }
}

#[async_trait]
impl Transport for MockDatastore {
    async fn send(&self, request: HttpRequest) -> kindstore_client::Result<HttpResponse> {
        if request.url == TOKEN_URI {
            let n = self.tokens_issued.fetch_add(1, Ordering::SeqCst) + 1;
            return Ok(HttpResponse::ok(json!({
                "access_token": format!("token-{}", n),
                "expires_in": 3600,
            })));
        }

        let method = method_of(&request.url).to_string();
        self.requests.lock().push(request.clone());

        let hold = self.holds.lock().get(&method).cloned();
        if let Some(notify) = hold {
            notify.notified().await;
        }

        let scripted = self
            .scripted
            .lock()
            .get_mut(&method)
            .and_then(VecDeque::pop_front);
        Ok(scripted.unwrap_or_else(|| self.default_response(&method, request.json_body())))
    }
}

fn method_of(url: &str) -> &str {
    url.rsplit(':').next().unwrap_or(url)
}

/// Signs nothing; the mock token endpoint accepts any assertion
pub struct StaticSigner;

impl TokenSigner for StaticSigner {
    fn sign(&self, claims: &Claims) -> kindstore_client::Result<String> {
        Ok(format!("assertion-for-{}", claims.iss))
    }
}

pub fn test_account() -> ServiceAccount {
    ServiceAccount {
        project_id: PROJECT.to_string(),
        token_uri: TOKEN_URI.to_string(),
        private_key: String::new(),
        client_email: "tester@test-project.iam".to_string(),
    }
}

pub fn test_config() -> ClientConfig {
    ClientConfig::new()
        .with_base_url(BASE_URL)
        .with_connect_poll_interval(Duration::from_millis(1))
        .with_connect_timeout(Duration::from_secs(5))
}

/// A client over `mock` that has not connected yet
pub fn client_for(mock: &Arc<MockDatastore>) -> Client {
    Client::with_transport(
        test_account(),
        test_config(),
        Arc::clone(mock) as Arc<dyn Transport>,
        Arc::new(StaticSigner),
    )
    .expect("Failed to create client")
}

/// A connected client over `mock`
pub async fn connected_client(mock: &Arc<MockDatastore>) -> Client {
    let client = client_for(mock);
    client.connect().await.expect("Failed to connect");
    client
}

/// Wire form of a complete key in the test project
pub fn key_json(kind: &str, id: i64) -> Json {
    json!({
        "partitionId": { "projectId": PROJECT },
        "path": [{ "kind": kind, "id": id.to_string() }],
    })
}

/// One `found` / `entityResults` element
pub fn entity_result(kind: &str, id: i64, properties: Json, version: &str) -> Json {
    json!({
        "entity": { "key": key_json(kind, id), "properties": properties },
        "version": version,
    })
}

/// Log to stderr when RUST_LOG is set; safe to call from every test
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Shorthand for the common test result type
pub type TestResult = anyhow::Result<()>;
