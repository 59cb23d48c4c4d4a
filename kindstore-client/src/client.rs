/// Entity service client
///
/// Owns the transport, the credential-renewal task and the request surface:
/// id allocation and reservation, lookup with deferred-key pagination, cursor
/// paginated queries and the commit protocol.
use crate::auth::{Renewal, Rs256Signer, TokenSigner, TokenSlot};
use crate::batch::Batch;
use crate::config::{ClientConfig, ServiceAccount};
use crate::error::{ClientError, Result};
use crate::mutation::{Mutations, Operand};
use crate::query::{Query, ReadOptions};
use crate::transaction::{Transaction, TransactionOptions};
use crate::transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use kindstore_core::entity::version_token;
use kindstore_core::{Entity, EntityBuilder, IdentityRequest, Key, Schema};
use parking_lot::Mutex;
use serde_json::{json, Value as Json};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// REST methods of the entity service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    AllocateIds,
    ReserveIds,
    Lookup,
    Commit,
    RunQuery,
    BeginTransaction,
    Rollback,
}

impl Endpoint {
    pub fn method(&self) -> &'static str {
        match self {
            Endpoint::AllocateIds => "allocateIds",
            Endpoint::ReserveIds => "reserveIds",
            Endpoint::Lookup => "lookup",
            Endpoint::Commit => "commit",
            Endpoint::RunQuery => "runQuery",
            Endpoint::BeginTransaction => "beginTransaction",
            Endpoint::Rollback => "rollback",
        }
    }
}

struct ClientInner {
    config: ClientConfig,
    account: ServiceAccount,
    transport: Arc<dyn Transport>,
    signer: Arc<dyn TokenSigner>,
    token: TokenSlot,
    renewal: Mutex<Option<JoinHandle<()>>>,
    connected: Arc<AtomicBool>,
    in_flight: AtomicUsize,
}

/// Decrements the in-flight counter when a request finishes
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Cheap to clone; clones share the session
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Client over the pooled HTTP transport, signing with the account's key
    pub fn new(account: ServiceAccount, config: ClientConfig) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(&config)?);
        let signer = Arc::new(Rs256Signer::from_pem(&account.private_key)?);
        Self::with_transport(account, config, transport, signer)
    }

    pub fn with_transport(
        account: ServiceAccount,
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        signer: Arc<dyn TokenSigner>,
    ) -> Result<Self> {
        config.validate().map_err(ClientError::Connection)?;
        let (token, _) = watch::channel(None);
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                account,
                transport,
                signer,
                token: Arc::new(token),
                renewal: Mutex::new(None),
                connected: Arc::new(AtomicBool::new(false)),
                in_flight: AtomicUsize::new(0),
            }),
        })
    }

    pub fn project(&self) -> &str {
        &self.inner.account.project_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Bearer token the next request will carry
    pub fn current_token(&self) -> Option<String> {
        self.inner.token.borrow().clone()
    }

    /// Number of requests currently awaiting a response
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    fn url(&self, endpoint: Endpoint) -> String {
        format!(
            "{}/projects/{}:{}",
            self.inner.config.base_url,
            self.project(),
            endpoint.method()
        )
    }

    /// Start credential renewal and wait for the first token
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Err(ClientError::Connection("client is already connected".to_string()));
        }

        let renewal = Renewal {
            transport: Arc::clone(&self.inner.transport),
            signer: Arc::clone(&self.inner.signer),
            account: self.inner.account.clone(),
            config: self.inner.config.clone(),
            token: Arc::clone(&self.inner.token),
            connected: Arc::clone(&self.inner.connected),
        };
        self.stop_renewal().await;
        let handle = tokio::spawn(renewal.run());
        *self.inner.renewal.lock() = Some(handle);

        let deadline = Instant::now() + self.inner.config.connect_timeout;
        while !self.is_connected() {
            if Instant::now() >= deadline {
                self.stop_renewal().await;
                self.inner.connected.store(false, Ordering::SeqCst);
                self.inner.token.send_replace(None);
                return Err(ClientError::Connection(format!(
                    "no access token within {:?}",
                    self.inner.config.connect_timeout
                )));
            }
            tokio::time::sleep(self.inner.config.connect_poll_interval).await;
        }

        info!(project = %self.project(), "connected");
        Ok(())
    }

    /// Abort the renewal task and wait until it can no longer touch the
    /// token slot or the connected flag
    async fn stop_renewal(&self) {
        let handle = self.inner.renewal.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            // Err(JoinError::Cancelled) is the expected outcome
            let _ = handle.await;
        }
    }

    /// Stop credential renewal. Refused while requests are outstanding.
    pub async fn disconnect(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(ClientError::Connection("client is not connected".to_string()));
        }
        let outstanding = self.in_flight();
        if outstanding > 0 {
            return Err(ClientError::Connection(format!(
                "{} requests still in flight",
                outstanding
            )));
        }

        self.stop_renewal().await;
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.token.send_replace(None);
        info!(project = %self.project(), "disconnected");
        Ok(())
    }

    fn begin_request(&self) -> Result<InFlight<'_>> {
        if !self.is_connected() {
            return Err(ClientError::Connection("client is not connected".to_string()));
        }
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(InFlight(&self.inner.in_flight))
    }

    /// POST a JSON body, returning the raw response whatever its status
    pub(crate) async fn send(&self, endpoint: Endpoint, body: Json) -> Result<HttpResponse> {
        let _guard = self.begin_request()?;
        let bearer = self.current_token();
        let request = HttpRequest::json(self.url(endpoint), body).with_bearer(bearer);
        debug!(endpoint = endpoint.method(), "request");
        self.inner.transport.send(request).await
    }

    /// POST a JSON body; anything but 200 is a protocol error
    pub(crate) async fn call(&self, endpoint: Endpoint, body: Json) -> Result<Json> {
        let response = self.send(endpoint, body).await?;
        if !response.is_success() {
            return Err(ClientError::protocol(
                endpoint.method(),
                response.status,
                error_payload(&response.body),
            ));
        }
        Ok(response.body)
    }

    async fn allocate_ids(&self, keys: &[Key]) -> Result<Vec<Key>> {
        let body = json!({ "keys": keys.iter().map(Key::to_json).collect::<Vec<_>>() });
        let response = self.call(Endpoint::AllocateIds, body).await?;
        response
            .get("keys")
            .and_then(Json::as_array)
            .map(|keys| keys.iter().map(Key::from_json).collect::<kindstore_core::Result<Vec<_>>>())
            .unwrap_or_else(|| Ok(Vec::new()))
            .map_err(ClientError::from)
    }

    /// Complete partial keys through the id allocator; `None` when the service refuses
    pub async fn allocate(&self, keys: &[Key]) -> Result<Option<Vec<Key>>> {
        match self.allocate_ids(keys).await {
            Ok(keys) => Ok(Some(keys)),
            Err(ClientError::Protocol { status, body, .. }) => {
                warn!(status, %body, "id allocation failed");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Mark application-chosen ids as used
    pub async fn reserve(&self, keys: &[Key]) -> Result<bool> {
        let body = json!({ "keys": keys.iter().map(Key::to_json).collect::<Vec<_>>() });
        let response = self.send(Endpoint::ReserveIds, body).await?;
        Ok(response.is_success())
    }

    /// Build an entity, allocating or reserving its id when requested
    pub async fn create(&self, builder: EntityBuilder) -> Result<Entity> {
        let (mut entity, identity) = builder.into_parts(self.project())?;
        match identity {
            IdentityRequest::Allocate => {
                let allocated = self.allocate_ids(&[entity.key().clone()]).await?;
                let id = allocated
                    .first()
                    .and_then(|key| key.id().cloned())
                    .ok_or_else(|| {
                        ClientError::protocol(Endpoint::AllocateIds.method(), 200, "no key allocated")
                    })?;
                entity.key_mut().complete(id)?;
            }
            IdentityRequest::Reserve(id) => {
                let response = self
                    .send(Endpoint::ReserveIds, json!({ "keys": [entity.key().to_json()] }))
                    .await?;
                if !response.is_success() {
                    return Err(ClientError::protocol(
                        Endpoint::ReserveIds.method(),
                        response.status,
                        format!("cannot reserve id {}: {}", id, error_payload(&response.body)),
                    ));
                }
            }
            IdentityRequest::Partial | IdentityRequest::Id(_) | IdentityRequest::Name(_) => {}
        }
        Ok(entity)
    }

    /// Lazily fetch entities, re-requesting deferred keys until none remain
    pub fn lookup<'a>(
        &'a self,
        schema: &Arc<Schema>,
        keys: Vec<Key>,
        read: ReadOptions,
    ) -> BoxStream<'a, Result<Entity>> {
        let pending: Vec<Json> = keys.iter().map(Key::to_json).collect();
        let initial = if pending.is_empty() { None } else { Some(pending) };
        let schema = Arc::clone(schema);

        stream::try_unfold(initial, move |pending| {
            let schema = Arc::clone(&schema);
            let read = read.clone();
            async move {
                let Some(keys) = pending else {
                    return Ok(None);
                };
                let body = json!({ "readOptions": read.to_json(), "keys": keys });
                let response = self.call(Endpoint::Lookup, body).await?;

                let found = response
                    .get("found")
                    .and_then(Json::as_array)
                    .map(|results| {
                        results
                            .iter()
                            .map(|result| Entity::from_result(&schema, result))
                            .collect::<kindstore_core::Result<Vec<_>>>()
                    })
                    .unwrap_or_else(|| Ok(Vec::new()))?;

                let deferred = response
                    .get("deferred")
                    .and_then(Json::as_array)
                    .cloned()
                    .unwrap_or_default();
                debug!(found = found.len(), deferred = deferred.len(), "lookup page");
                let next = if deferred.is_empty() { None } else { Some(deferred) };
                Ok::<_, ClientError>(Some((found, next)))
            }
        })
        .map_ok(|page| stream::iter(page.into_iter().map(Ok::<Entity, ClientError>)))
        .try_flatten()
        .boxed()
    }

    /// Collect every lookup result
    pub async fn lookup_all(
        &self,
        schema: &Arc<Schema>,
        keys: Vec<Key>,
        read: ReadOptions,
    ) -> Result<Vec<Entity>> {
        self.lookup(schema, keys, read).try_collect().await
    }

    /// Fetch one entity by key
    pub async fn get(&self, schema: &Arc<Schema>, key: Key, read: ReadOptions) -> Result<Option<Entity>> {
        let mut found = self.lookup_all(schema, vec![key], read).await?;
        Ok(found.pop())
    }

    /// Run a query, following end cursors until the service reports completion
    pub async fn run_query(&self, query: &Query, read: ReadOptions) -> Result<Vec<Entity>> {
        let mut results = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let body = query.to_request(self.project(), &read, cursor.as_deref());
            let response = self.call(Endpoint::RunQuery, body).await?;
            let batch = response.get("batch").ok_or_else(|| {
                ClientError::protocol(Endpoint::RunQuery.method(), 200, "response has no batch")
            })?;

            if let Some(entity_results) = batch.get("entityResults").and_then(Json::as_array) {
                for result in entity_results {
                    results.push(Entity::from_result(query.schema(), result)?);
                }
            }

            let more = batch.get("moreResults").and_then(Json::as_str).unwrap_or_default();
            match more {
                "NO_MORE_RESULTS" | "MORE_RESULTS_AFTER_LIMIT" | "MORE_RESULTS_AFTER_CURSOR" => {
                    return Ok(results);
                }
                "NOT_FINISHED" => {
                    let end = batch.get("endCursor").and_then(Json::as_str).ok_or_else(|| {
                        ClientError::protocol(
                            Endpoint::RunQuery.method(),
                            200,
                            "NOT_FINISHED batch without endCursor",
                        )
                    })?;
                    debug!(fetched = results.len(), "query page");
                    cursor = Some(end.to_string());
                }
                other => {
                    return Err(ClientError::protocol(
                        Endpoint::RunQuery.method(),
                        200,
                        format!("unexpected moreResults value {:?}", other),
                    ));
                }
            }
        }
    }

    /// Apply mutation groups and return the operands the service reported in conflict.
    ///
    /// Results pair with operands positionally in update → upsert → insert →
    /// delete order. Nothing is touched unless the whole response is usable.
    pub async fn commit(&self, transaction: Option<&str>, mutations: &Mutations) -> Result<Vec<Operand>> {
        let operands = mutations.operands();
        let records = operands
            .iter()
            .map(|(kind, operand)| operand.to_mutation(*kind))
            .collect::<Result<Vec<_>>>()?;

        let mut body = json!({
            "mode": if transaction.is_some() { "TRANSACTIONAL" } else { "NON_TRANSACTIONAL" },
            "mutations": records,
        });
        if let Some(id) = transaction {
            body["transaction"] = json!(id);
        }

        let [update, upsert, insert, delete] = mutations.sizes();
        debug!(
            update,
            upsert,
            insert,
            delete,
            transaction = transaction.unwrap_or("-"),
            "commit"
        );

        let response = self.call(Endpoint::Commit, body).await?;
        let results = response
            .get("mutationResults")
            .and_then(Json::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        if results.len() != operands.len() {
            return Err(ClientError::protocol(
                Endpoint::Commit.method(),
                200,
                format!(
                    "expected {} mutation results, received {}",
                    operands.len(),
                    results.len()
                ),
            ));
        }
        let results = results
            .iter()
            .map(MutationResult::parse)
            .collect::<kindstore_core::Result<Vec<_>>>()?;

        // One snapshot per entity, taken before any result is applied; an
        // entity may sit in more than one group
        if transaction.is_some() {
            for entity in mutations.entities() {
                entity.lock().backup();
            }
        }

        let mut conflicts = Vec::new();
        for ((_, operand), result) in operands.into_iter().zip(results) {
            if let Operand::Entity(shared) = &operand {
                let mut entity = shared.lock();
                entity.set_version(result.version);
                if let Some(id) = result.key.as_ref().and_then(Key::id) {
                    if entity.key().is_partial() {
                        entity.key_mut().complete(id.clone())?;
                    }
                }
            }
            if result.conflict {
                conflicts.push(operand);
            }
        }

        if !conflicts.is_empty() {
            debug!(conflicts = conflicts.len(), "commit reported conflicts");
        }
        Ok(conflicts)
    }

    /// Start a transaction, returning its id
    pub async fn begin(&self, options: &TransactionOptions) -> Result<String> {
        let body = json!({ "transactionOptions": options.to_json() });
        let response = self.call(Endpoint::BeginTransaction, body).await?;
        response
            .get("transaction")
            .and_then(Json::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ClientError::protocol(
                    Endpoint::BeginTransaction.method(),
                    200,
                    "response has no transaction id",
                )
            })
    }

    pub async fn rollback(&self, transaction: &str) -> Result<()> {
        self.call(Endpoint::Rollback, json!({ "transaction": transaction }))
            .await
            .map(|_| ())
    }

    /// Begin a transaction scope
    pub async fn begin_transaction(&self, options: TransactionOptions) -> Result<Transaction> {
        let id = self.begin(&options).await?;
        debug!(transaction = %id, read_only = options.read_only, "transaction began");
        Ok(Transaction::new(self.clone(), id, options.read_only))
    }

    /// Non-transactional mutation accumulator
    pub fn batch(&self) -> Batch {
        Batch::new(self.clone())
    }
}

/// One entry of `mutationResults`
#[derive(Debug)]
struct MutationResult {
    version: Option<String>,
    key: Option<Key>,
    conflict: bool,
}

impl MutationResult {
    fn parse(value: &Json) -> kindstore_core::Result<Self> {
        let key = value.get("key").map(Key::from_json).transpose()?;
        Ok(Self {
            version: value.get("version").and_then(version_token),
            key,
            conflict: value
                .get("conflictDetected")
                .and_then(Json::as_bool)
                .unwrap_or(false),
        })
    }
}

/// The service's error object when present, else the whole body
fn error_payload(body: &Json) -> String {
    body.get("error").unwrap_or(body).to_string()
}
