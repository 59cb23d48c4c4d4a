/// Non-transactional write batches
use crate::client::Client;
use crate::error::Result;
use crate::mutation::{Mutations, Operand};
use kindstore_core::SharedEntity;

/// Accumulates writes and applies them in one non-transactional commit
pub struct Batch {
    client: Client,
    mutations: Mutations,
}

impl Batch {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            client,
            mutations: Mutations::new(),
        }
    }

    pub fn insert(&mut self, entity: &SharedEntity) -> &mut Self {
        self.mutations.insert(entity);
        self
    }

    pub fn update(&mut self, entity: &SharedEntity) -> &mut Self {
        self.mutations.update(entity);
        self
    }

    pub fn upsert(&mut self, entity: &SharedEntity) -> &mut Self {
        self.mutations.upsert(entity);
        self
    }

    pub fn delete(&mut self, operand: impl Into<Operand>) -> &mut Self {
        self.mutations.delete(operand);
        self
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Commit the batch, returning operands reported in conflict
    pub async fn commit(self) -> Result<Vec<Operand>> {
        self.client.commit(None, &self.mutations).await
    }
}
