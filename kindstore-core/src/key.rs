/// Entity identity: project, namespace, kind and a numeric id or a name.
///
/// A key without an id or name is *partial*. It becomes complete exactly once,
/// through `complete`, or by being rolled back to a state captured earlier.
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};
use std::fmt;
use std::hash::{Hash, Hasher};

/// The identifying half of a complete key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyId {
    /// Numeric id, allocated by the service or chosen by the application
    Id(i64),
    /// Application-chosen name
    Name(String),
}

impl KeyId {
    /// Wire name of the identifier slot ("id" or "name")
    pub fn id_type(&self) -> &'static str {
        match self {
            KeyId::Id(_) => "id",
            KeyId::Name(_) => "name",
        }
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyId::Id(id) => write!(f, "{}", id),
            KeyId::Name(name) => write!(f, "{:?}", name),
        }
    }
}

/// One-slot snapshot taken before a transactional commit
#[derive(Debug, Clone)]
struct KeyBackup {
    id: Option<KeyId>,
}

#[derive(Debug, Clone)]
pub struct Key {
    project: String,
    kind: String,
    namespace: Option<String>,
    id: Option<KeyId>,
    backup: Option<KeyBackup>,
}

impl Key {
    /// Create a partial key
    pub fn new(project: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            kind: kind.into(),
            namespace: None,
            id: None,
            backup: None,
        }
    }

    /// Create a key completed with a numeric id
    pub fn with_id(project: impl Into<String>, kind: impl Into<String>, id: i64) -> Self {
        let mut key = Self::new(project, kind);
        key.id = Some(KeyId::Id(id));
        key
    }

    /// Create a key completed with a name
    pub fn with_name(
        project: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let mut key = Self::new(project, kind);
        key.id = Some(KeyId::Name(name.into()));
        key
    }

    /// Place the key in a namespace
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn id(&self) -> Option<&KeyId> {
        self.id.as_ref()
    }

    pub fn is_partial(&self) -> bool {
        self.id.is_none()
    }

    /// Complete a partial key. Completing a complete key is an error.
    pub fn complete(&mut self, id: KeyId) -> Result<()> {
        if let Some(existing) = &self.id {
            return Err(Error::KeyState(format!(
                "key {}:{} is already complete; only a partial key can be completed",
                self.kind, existing
            )));
        }
        self.id = Some(id);
        Ok(())
    }

    pub fn complete_with_id(&mut self, id: i64) -> Result<()> {
        self.complete(KeyId::Id(id))
    }

    pub fn complete_with_name(&mut self, name: impl Into<String>) -> Result<()> {
        self.complete(KeyId::Name(name.into()))
    }

    /// Drop the identifier, turning the key partial again
    pub fn uncomplete(&mut self) {
        self.id = None;
    }

    /// Snapshot the identifier so a failed transaction can restore it
    pub fn backup(&mut self) {
        self.backup = Some(KeyBackup { id: self.id.clone() });
    }

    /// Restore the identifier from the snapshot, if one exists
    pub fn rollback(&mut self) {
        if let Some(backup) = &self.backup {
            self.id = backup.id.clone();
        }
    }

    pub fn clear_backup(&mut self) {
        self.backup = None;
    }

    pub fn has_backup(&self) -> bool {
        self.backup.is_some()
    }

    /// Encode as a wire key (`{partitionId, path}`)
    pub fn to_json(&self) -> Json {
        let mut partition = Map::new();
        partition.insert("projectId".to_string(), json!(self.project));
        if let Some(ns) = &self.namespace {
            partition.insert("namespaceId".to_string(), json!(ns));
        }

        let mut element = Map::new();
        element.insert("kind".to_string(), json!(self.kind));
        match &self.id {
            // int64 travels as a JSON string
            Some(KeyId::Id(id)) => {
                element.insert("id".to_string(), json!(id.to_string()));
            }
            Some(KeyId::Name(name)) => {
                element.insert("name".to_string(), json!(name));
            }
            None => {}
        }

        json!({ "partitionId": partition, "path": [element] })
    }

    /// Decode a wire key. Keys have no ancestors here, so the path must hold
    /// exactly one element.
    pub fn from_json(value: &Json) -> Result<Self> {
        let partition = value
            .get("partitionId")
            .ok_or_else(|| Error::Decode("key has no partitionId".to_string()))?;
        let project = partition
            .get("projectId")
            .and_then(Json::as_str)
            .ok_or_else(|| Error::Decode("key partition has no projectId".to_string()))?;
        let namespace = partition
            .get("namespaceId")
            .and_then(Json::as_str)
            .filter(|ns| !ns.is_empty());

        let element = match value.get("path").and_then(Json::as_array).map(Vec::as_slice) {
            Some([element]) => element,
            Some([]) | None => return Err(Error::Decode("key has an empty path".to_string())),
            Some(path) => {
                return Err(Error::Decode(format!(
                    "key path has {} elements; ancestor paths are not supported",
                    path.len()
                )))
            }
        };
        let kind = element
            .get("kind")
            .and_then(Json::as_str)
            .ok_or_else(|| Error::Decode("key path element has no kind".to_string()))?;

        let mut key = Key::new(project, kind);
        key.namespace = namespace.map(str::to_string);
        if let Some(id) = element.get("id") {
            key.id = Some(KeyId::Id(decode_int64(id)?));
        } else if let Some(name) = element.get("name").and_then(Json::as_str) {
            key.id = Some(KeyId::Name(name.to_string()));
        }
        Ok(key)
    }
}

/// int64 values are strings on the wire, but accept bare numbers too
pub(crate) fn decode_int64(value: &Json) -> Result<i64> {
    match value {
        Json::String(s) => s
            .parse::<i64>()
            .map_err(|e| Error::Decode(format!("invalid int64 {:?}: {}", s, e))),
        Json::Number(n) => n
            .as_i64()
            .ok_or_else(|| Error::Decode(format!("invalid int64 {}", n))),
        other => Err(Error::Decode(format!("expected int64, found {}", other))),
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.project == other.project
            && self.kind == other.kind
            && self.namespace == other.namespace
            && self.id == other.id
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.project.hash(state);
        self.kind.hash(state);
        self.namespace.hash(state);
        self.id.hash(state);
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}:{}", self.kind, id),
            None => write!(f, "{}:<partial>", self.kind),
        }
    }
}
