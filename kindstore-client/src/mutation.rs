/// Pending mutation groups for a commit
use crate::error::Result;
use kindstore_core::{Key, SharedEntity};
use serde_json::{json, Map, Value as Json};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Update,
    Upsert,
    Insert,
    Delete,
}

impl MutationKind {
    /// Mutation field name on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Update => "update",
            MutationKind::Upsert => "upsert",
            MutationKind::Insert => "insert",
            MutationKind::Delete => "delete",
        }
    }
}

/// Something a mutation applies to: a live entity, or a bare key for deletes
#[derive(Clone)]
pub enum Operand {
    Entity(SharedEntity),
    Key(Key),
}

impl Operand {
    /// Entities compare by identity, keys by value
    pub fn same(&self, other: &Operand) -> bool {
        match (self, other) {
            (Operand::Entity(a), Operand::Entity(b)) => Arc::ptr_eq(a, b),
            (Operand::Key(a), Operand::Key(b)) => a == b,
            _ => false,
        }
    }

    pub fn is_entity(&self, entity: &SharedEntity) -> bool {
        matches!(self, Operand::Entity(e) if Arc::ptr_eq(e, entity))
    }

    pub fn key(&self) -> Key {
        match self {
            Operand::Entity(entity) => entity.lock().key().clone(),
            Operand::Key(key) => key.clone(),
        }
    }

    /// One mutation record carrying the operand's last known version
    pub(crate) fn to_mutation(&self, kind: MutationKind) -> Result<Json> {
        let (payload, version) = match self {
            Operand::Entity(entity) => {
                let entity = entity.lock();
                let payload = match kind {
                    MutationKind::Delete => entity.key().to_json(),
                    _ => entity.to_entity()?,
                };
                (payload, entity.version().map(str::to_string))
            }
            Operand::Key(key) => (key.to_json(), None),
        };

        let mut mutation = Map::new();
        mutation.insert(kind.as_str().to_string(), payload);
        if let Some(version) = version {
            mutation.insert("baseVersion".to_string(), json!(version));
        }
        Ok(Json::Object(mutation))
    }
}

impl From<SharedEntity> for Operand {
    fn from(entity: SharedEntity) -> Self {
        Operand::Entity(entity)
    }
}

impl From<Key> for Operand {
    fn from(key: Key) -> Self {
        Operand::Key(key)
    }
}

impl fmt::Debug for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Entity(entity) => write!(f, "Entity({})", entity.lock().key()),
            Operand::Key(key) => write!(f, "Key({})", key),
        }
    }
}

/// Accumulated update / upsert / insert / delete groups
///
/// Each group holds an operand at most once.
#[derive(Debug, Clone, Default)]
pub struct Mutations {
    update: Vec<Operand>,
    upsert: Vec<Operand>,
    insert: Vec<Operand>,
    delete: Vec<Operand>,
}

impl Mutations {
    pub fn new() -> Self {
        Self::default()
    }

    fn group_mut(&mut self, kind: MutationKind) -> &mut Vec<Operand> {
        match kind {
            MutationKind::Update => &mut self.update,
            MutationKind::Upsert => &mut self.upsert,
            MutationKind::Insert => &mut self.insert,
            MutationKind::Delete => &mut self.delete,
        }
    }

    pub fn add(&mut self, kind: MutationKind, operand: Operand) {
        let group = self.group_mut(kind);
        if !group.iter().any(|existing| existing.same(&operand)) {
            group.push(operand);
        }
    }

    pub fn update(&mut self, entity: &SharedEntity) {
        self.add(MutationKind::Update, Operand::Entity(Arc::clone(entity)));
    }

    pub fn upsert(&mut self, entity: &SharedEntity) {
        self.add(MutationKind::Upsert, Operand::Entity(Arc::clone(entity)));
    }

    pub fn insert(&mut self, entity: &SharedEntity) {
        self.add(MutationKind::Insert, Operand::Entity(Arc::clone(entity)));
    }

    pub fn delete(&mut self, operand: impl Into<Operand>) {
        self.add(MutationKind::Delete, operand.into());
    }

    pub fn len(&self) -> usize {
        self.update.len() + self.upsert.len() + self.insert.len() + self.delete.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Group sizes in commit order
    pub fn sizes(&self) -> [usize; 4] {
        [self.update.len(), self.upsert.len(), self.insert.len(), self.delete.len()]
    }

    /// All operands in the fixed order update → upsert → insert → delete
    pub fn operands(&self) -> Vec<(MutationKind, Operand)> {
        let groups = [
            (MutationKind::Update, &self.update),
            (MutationKind::Upsert, &self.upsert),
            (MutationKind::Insert, &self.insert),
            (MutationKind::Delete, &self.delete),
        ];
        groups
            .into_iter()
            .flat_map(|(kind, group)| group.iter().map(move |operand| (kind, operand.clone())))
            .collect()
    }

    /// Every entity taking part, each once
    pub fn entities(&self) -> Vec<SharedEntity> {
        let mut entities: Vec<SharedEntity> = Vec::new();
        for (_, operand) in self.operands() {
            if let Operand::Entity(entity) = operand {
                if !entities.iter().any(|seen| Arc::ptr_eq(seen, &entity)) {
                    entities.push(entity);
                }
            }
        }
        entities
    }
}
