/// Entity instances: one record value of a schema
///
/// An entity owns its key, the last version token the service reported and
/// its field values. The commit protocol rewrites version and key; the
/// one-slot backup lets a failed transaction put both back.
use crate::key::Key;
use crate::schema::{Schema, LOCK_FIELD};
use crate::{Error, Result, Value};
use parking_lot::Mutex;
use serde_json::{json, Value as Json};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Entity shared between application code and pending mutations
pub type SharedEntity = Arc<Mutex<Entity>>;

/// How a new entity obtains its identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityRequest {
    /// Partial key, completed by the service on insert
    Partial,
    Id(i64),
    Name(String),
    /// Fetch a fresh id from the id allocator
    Allocate,
    /// Mark an application-chosen id as used
    Reserve(i64),
}

#[derive(Clone)]
pub struct Entity {
    schema: Arc<Schema>,
    key: Key,
    version: Option<String>,
    values: BTreeMap<String, Value>,
    backup: Option<Option<String>>,
}

impl Entity {
    pub fn builder(schema: &Arc<Schema>) -> EntityBuilder {
        EntityBuilder::new(schema)
    }

    /// Wrap already-molded values
    fn from_parts(schema: Arc<Schema>, key: Key, values: BTreeMap<String, Value>) -> Self {
        Self {
            schema,
            key,
            version: None,
            values,
            backup: None,
        }
    }

    pub fn into_shared(self) -> SharedEntity {
        Arc::new(Mutex::new(self))
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn key_mut(&mut self) -> &mut Key {
        &mut self.key
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn set_version(&mut self, version: Option<String>) {
        self.version = version;
    }

    /// Field value, falling back to the field default
    pub fn get(&self, name: &str) -> Result<Option<Value>> {
        self.schema.read(&self.values, name)
    }

    /// Stored value only
    pub fn raw(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.schema.write(&mut self.values, name, Some(value.into()))
    }

    pub fn clear(&mut self, name: &str) -> Result<()> {
        self.schema.write(&mut self.values, name, None)
    }

    /// Snapshot version and key ahead of a transactional commit
    pub fn backup(&mut self) {
        self.backup = Some(self.version.clone());
        self.key.backup();
    }

    pub fn rollback(&mut self) {
        if let Some(version) = self.backup.take() {
            self.version = version;
            self.key.rollback();
        }
    }

    pub fn clear_backup(&mut self) {
        self.backup = None;
        self.key.clear_backup();
    }

    pub fn has_backup(&self) -> bool {
        self.backup.is_some()
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.values.get(LOCK_FIELD), Some(Value::Boolean(true)))
    }

    pub fn set_locked(&mut self, locked: bool) -> Result<()> {
        if !self.schema.is_locking() {
            return Err(Error::InvalidArgument(format!(
                "{} does not support locking",
                self.schema.name()
            )));
        }
        self.schema
            .write(&mut self.values, LOCK_FIELD, Some(Value::Boolean(locked)))
    }

    /// Clear the lock mark locally; persisting it is a separate write
    pub fn unlock(&mut self) -> Result<()> {
        self.set_locked(false)
    }

    /// Wire form: `{key, properties}`; properties are omitted when empty
    pub fn to_entity(&self) -> Result<Json> {
        let properties = self.schema.encode_properties(&self.values)?;
        let mut entity = json!({ "key": self.key.to_json() });
        if !properties.is_empty() {
            entity["properties"] = Json::Object(properties);
        }
        Ok(entity)
    }

    /// Decode a wire entity of this schema's kind
    pub fn from_entity(schema: &Arc<Schema>, entity: &Json, version: Option<String>) -> Result<Self> {
        let key_json = entity
            .get("key")
            .ok_or_else(|| Error::Decode("entity has no key".to_string()))?;
        let key = Key::from_json(key_json)?;
        if key.kind() != schema.kind() {
            return Err(Error::Decode(format!(
                "expected kind {:?}, found {:?}",
                schema.kind(),
                key.kind()
            )));
        }

        let values = match entity.get("properties").and_then(Json::as_object) {
            Some(properties) => schema.decode_properties(properties)?,
            None => schema.decode_properties(&serde_json::Map::new())?,
        };

        let mut decoded = Self::from_parts(Arc::clone(schema), key, values);
        decoded.version = version;
        Ok(decoded)
    }

    /// Decode an entity result (`{entity, version}`) from lookup or runQuery
    pub fn from_result(schema: &Arc<Schema>, result: &Json) -> Result<Self> {
        let entity = result
            .get("entity")
            .ok_or_else(|| Error::Decode("entity result has no entity".to_string()))?;
        let version = result.get("version").and_then(version_token);
        Self::from_entity(schema, entity, version)
    }
}

/// Versions are int64 on the wire, usually as strings
pub fn version_token(value: &Json) -> Option<String> {
    match value {
        Json::String(s) => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("key", &self.key)
            .field("version", &self.version)
            .field("values", &self.values)
            .field("has_backup", &self.backup.is_some())
            .finish()
    }
}

/// Collects construction arguments for a new entity
pub struct EntityBuilder {
    schema: Arc<Schema>,
    namespace: Option<String>,
    id: Option<i64>,
    name: Option<String>,
    allocate: bool,
    reserve: Option<i64>,
    values: BTreeMap<String, Value>,
}

impl EntityBuilder {
    pub fn new(schema: &Arc<Schema>) -> Self {
        Self {
            schema: Arc::clone(schema),
            namespace: None,
            id: None,
            name: None,
            allocate: false,
            reserve: None,
            values: BTreeMap::new(),
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn allocate(mut self) -> Self {
        self.allocate = true;
        self
    }

    pub fn reserve(mut self, id: i64) -> Self {
        self.reserve = Some(id);
        self
    }

    pub fn value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The identity request, rejecting conflicting requests
    pub fn identity(&self) -> Result<IdentityRequest> {
        let requested = self.id.is_some() as u8
            + self.name.is_some() as u8
            + self.allocate as u8
            + self.reserve.is_some() as u8;
        if requested > 1 {
            return Err(Error::InvalidArgument(
                "id, name, allocate and reserve are mutually exclusive".to_string(),
            ));
        }

        Ok(if let Some(id) = self.id {
            IdentityRequest::Id(id)
        } else if let Some(name) = &self.name {
            IdentityRequest::Name(name.clone())
        } else if self.allocate {
            IdentityRequest::Allocate
        } else if let Some(id) = self.reserve {
            IdentityRequest::Reserve(id)
        } else {
            IdentityRequest::Partial
        })
    }

    /// Validate everything and split into the entity and its identity request.
    ///
    /// For `Allocate` the key is left partial; the caller completes it.
    pub fn into_parts(self, project: &str) -> Result<(Entity, IdentityRequest)> {
        let identity = self.identity()?;
        let values = self.schema.instantiate(self.values)?;

        let mut key = Key::new(project, self.schema.kind());
        if let Some(namespace) = self.namespace {
            key = key.in_namespace(namespace);
        }
        match &identity {
            IdentityRequest::Id(id) | IdentityRequest::Reserve(id) => key.complete_with_id(*id)?,
            IdentityRequest::Name(name) => key.complete_with_name(name.clone())?,
            IdentityRequest::Allocate | IdentityRequest::Partial => {}
        }

        Ok((Entity::from_parts(self.schema, key, values), identity))
    }

    /// Build without a client; allocation and reservation need one
    pub fn build(self, project: &str) -> Result<Entity> {
        let (entity, identity) = self.into_parts(project)?;
        match identity {
            IdentityRequest::Allocate | IdentityRequest::Reserve(_) => Err(Error::InvalidArgument(
                "allocate and reserve need a connected client".to_string(),
            )),
            _ => Ok(entity),
        }
    }
}
