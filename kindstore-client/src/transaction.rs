/// Transaction scopes
///
/// A transaction accumulates mutation groups like a batch, pins its reads to
/// the transaction id and, on commit, rolls conflicted entities back to their
/// pre-commit identity and version.
use crate::client::Client;
use crate::error::{ClientError, Result};
use crate::mutation::{Mutations, Operand};
use crate::query::{Query, ReadOptions};
use kindstore_core::{Entity, Key, Schema, SharedEntity};
use serde_json::{json, Value as Json};
use std::sync::Arc;
use tracing::{debug, warn};

/// Options for `beginTransaction`
#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    pub read_only: bool,
    /// Failed transaction this attempt retries
    pub previous: Option<String>,
}

impl TransactionOptions {
    pub fn read_write() -> Self {
        Self::default()
    }

    pub fn read_only() -> Self {
        Self {
            read_only: true,
            previous: None,
        }
    }

    pub fn retrying(mut self, previous: impl Into<String>) -> Self {
        self.previous = Some(previous.into());
        self
    }

    /// `transactionOptions` body; only read-write attempts link to a previous one
    pub fn to_json(&self) -> Json {
        if self.read_only {
            return json!({ "readOnly": {} });
        }
        match &self.previous {
            Some(previous) => json!({ "readWrite": { "previousTransaction": previous } }),
            None => json!({ "readWrite": {} }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Began,
    Committing,
    /// Committed without conflicts
    Confirmed,
    /// Conflicts were reported and the transaction was rolled back
    RolledBack,
    /// Read-only scope closed, or the commit call itself failed
    Closed,
}

pub struct Transaction {
    client: Client,
    id: String,
    read_only: bool,
    state: TransactionState,
    mutations: Mutations,
    /// Entities marked locked by this transaction
    locked: Vec<SharedEntity>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("read_only", &self.read_only)
            .field("state", &self.state)
            .field("mutations", &self.mutations)
            .finish_non_exhaustive()
    }
}

impl Transaction {
    pub(crate) fn new(client: Client, id: String, read_only: bool) -> Self {
        Self {
            client,
            id,
            read_only,
            state: TransactionState::Began,
            mutations: Mutations::new(),
            locked: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn mutations(&self) -> &Mutations {
        &self.mutations
    }

    pub fn insert(&mut self, entity: &SharedEntity) {
        self.mutations.insert(entity);
    }

    pub fn update(&mut self, entity: &SharedEntity) {
        self.mutations.update(entity);
    }

    pub fn upsert(&mut self, entity: &SharedEntity) {
        self.mutations.upsert(entity);
    }

    pub fn delete(&mut self, operand: impl Into<Operand>) {
        self.mutations.delete(operand);
    }

    fn read_options(&self) -> ReadOptions {
        ReadOptions::in_transaction(self.id.clone())
    }

    pub async fn lookup(&self, schema: &Arc<Schema>, keys: Vec<Key>) -> Result<Vec<Entity>> {
        self.client.lookup_all(schema, keys, self.read_options()).await
    }

    pub async fn get(&self, schema: &Arc<Schema>, key: Key) -> Result<Option<Entity>> {
        self.client.get(schema, key, self.read_options()).await
    }

    pub async fn run_query(&self, query: &Query) -> Result<Vec<Entity>> {
        self.client.run_query(query, self.read_options()).await
    }

    /// Mark an entity locked and queue the write; a locked entity is refused
    pub fn lock(&mut self, entity: &SharedEntity) -> Result<()> {
        {
            let mut guard = entity.lock();
            if guard.is_locked() {
                return Err(ClientError::Locked(guard.key().to_string()));
            }
            guard.set_locked(true)?;
        }
        self.mutations.upsert(entity);
        self.locked.push(Arc::clone(entity));
        Ok(())
    }

    /// Clear the lock marks this transaction set; used when it does not go through
    pub(crate) fn release_locks(&mut self) {
        for entity in self.locked.drain(..) {
            if let Err(e) = entity.lock().set_locked(false) {
                warn!(transaction = %self.id, error = %e, "cannot clear lock mark");
            }
        }
    }

    fn ensure_began(&self) -> Result<()> {
        if self.state != TransactionState::Began {
            return Err(kindstore_core::Error::InvalidArgument(format!(
                "transaction {} is {:?}",
                self.id, self.state
            ))
            .into());
        }
        Ok(())
    }

    /// Close the scope.
    ///
    /// Read-only transactions make no call. Otherwise the accumulated groups
    /// are committed; on conflict the transaction is rolled back, conflicted
    /// entities are restored and `TransactionFailed` is returned.
    pub async fn commit(&mut self) -> Result<()> {
        self.ensure_began()?;
        if self.read_only {
            self.state = TransactionState::Closed;
            return Ok(());
        }

        self.state = TransactionState::Committing;
        let conflicts = match self.client.commit(Some(&self.id), &self.mutations).await {
            Ok(conflicts) => conflicts,
            Err(e) => {
                self.state = TransactionState::Closed;
                self.release_locks();
                return Err(e);
            }
        };

        if conflicts.is_empty() {
            for entity in self.mutations.entities() {
                entity.lock().clear_backup();
            }
            self.state = TransactionState::Confirmed;
            debug!(transaction = %self.id, "transaction confirmed");
            return Ok(());
        }

        if let Err(e) = self.client.rollback(&self.id).await {
            warn!(transaction = %self.id, error = %e, "rollback after conflict failed");
        }

        for entity in self.mutations.entities() {
            let mut guard = entity.lock();
            if conflicts.iter().any(|operand| operand.is_entity(&entity)) {
                guard.rollback();
            }
            guard.clear_backup();
        }
        self.release_locks();

        self.state = TransactionState::RolledBack;
        debug!(transaction = %self.id, conflicts = conflicts.len(), "transaction rolled back");
        Err(ClientError::TransactionFailed {
            id: self.id.clone(),
        })
    }

    /// Abandon the transaction without committing
    pub async fn rollback(&mut self) -> Result<()> {
        self.ensure_began()?;
        if self.read_only {
            self.state = TransactionState::Closed;
            return Ok(());
        }
        self.state = TransactionState::RolledBack;
        self.release_locks();
        self.client.rollback(&self.id).await
    }

    /// Whether the service may still hold this transaction open
    pub(crate) fn needs_rollback(&self) -> bool {
        !self.read_only && matches!(self.state, TransactionState::Began | TransactionState::Closed)
    }
}
