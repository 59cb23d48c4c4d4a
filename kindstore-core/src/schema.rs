/// Record schemas: named, immutable compositions of fields
///
/// A schema is assembled once through [`SchemaBuilder`] and shared behind an
/// `Arc`. The builder merges ancestor field maps (most-derived wins), rejects
/// reserved names, derives the kind and computes the non-indexed set.
use crate::field::Field;
use crate::{wire, Error, Result, Value};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value as Json};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Internal bookkeeping field added to schemas that opt into locking
pub const LOCK_FIELD: &str = "_locked";

/// Names owned by the entity operation surface
pub const RESERVED_NAMES: &[&str] = &[
    "id",
    "key",
    "entity",
    "from_entity",
    "save",
    "unlock",
    "find",
    "find_or_create",
    "find_where",
    "delete",
    "fetch",
    "update",
    "insert",
    "lookup",
    "reserve",
    "preallocate",
    "version",
];

const KIND_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_.\-]*$";

lazy_static! {
    /// Compiled once; the pattern is a constant
    static ref KIND_REGEX: Regex = Regex::new(KIND_PATTERN).expect("kind pattern is valid");
}

pub struct Schema {
    name: String,
    kind: String,
    fields: BTreeMap<String, Field>,
    noindex: BTreeSet<String>,
    locking: bool,
}

impl Schema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(name, field)| (name.as_str(), field))
    }

    /// Field names emitted with `excludeFromIndexes`
    pub fn noindex(&self) -> &BTreeSet<String> {
        &self.noindex
    }

    pub fn is_locking(&self) -> bool {
        self.locking
    }

    /// Identity comparison; two schemas are the same only if they are one value
    pub fn same(a: &Arc<Schema>, b: &Arc<Schema>) -> bool {
        Arc::ptr_eq(a, b)
    }

    fn lookup_field(&self, name: &str) -> Result<&Field> {
        self.fields
            .get(name)
            .ok_or_else(|| Error::UnknownField(format!("{} has no field {:?}", self.name, name)))
    }

    /// Read accessor: the stored value, else the field default
    pub fn read(&self, values: &BTreeMap<String, Value>, name: &str) -> Result<Option<Value>> {
        let field = self.lookup_field(name)?;
        match values.get(name) {
            Some(value) => Ok(Some(value.clone())),
            None => field.default_value(),
        }
    }

    /// Write accessor: molds the value and stores it, removing it when absent
    pub fn write(
        &self,
        values: &mut BTreeMap<String, Value>,
        name: &str,
        value: Option<Value>,
    ) -> Result<()> {
        let field = self.lookup_field(name)?;
        match field.mold(value)? {
            Some(molded) => {
                values.insert(name.to_string(), molded);
            }
            None if field.is_required() => {
                return Err(Error::validation(
                    Option::<Value>::None,
                    format!("{}.{} is required", self.name, name),
                ));
            }
            None => {
                values.remove(name);
            }
        }
        Ok(())
    }

    /// Mold a full set of raw values into a value store
    pub fn instantiate(&self, raw: BTreeMap<String, Value>) -> Result<BTreeMap<String, Value>> {
        if let Some(unknown) = raw.keys().find(|name| !self.fields.contains_key(*name)) {
            return Err(Error::UnknownField(format!("{} has no field {:?}", self.name, unknown)));
        }

        let mut raw = raw;
        let mut values = BTreeMap::new();
        for (name, field) in &self.fields {
            let molded = match raw.remove(name) {
                Some(value) => field.mold(Some(value))?,
                None => field.default_value()?,
            };
            match molded {
                Some(value) => {
                    values.insert(name.clone(), value);
                }
                None if field.is_required() => {
                    return Err(Error::validation(
                        Option::<Value>::None,
                        format!("{}.{} is required", self.name, name),
                    ));
                }
                None => {}
            }
        }
        Ok(values)
    }

    /// Encode present values into a wire property map
    pub fn encode_properties(&self, values: &BTreeMap<String, Value>) -> Result<Map<String, Json>> {
        let mut properties = Map::new();
        for (name, field) in &self.fields {
            if let Some(mut encoded) = field.to_entity(values.get(name))? {
                if self.noindex.contains(name) {
                    wire::mark_unindexed(&mut encoded);
                }
                properties.insert(name.clone(), encoded);
            }
        }
        Ok(properties)
    }

    /// Decode a wire property map. Unknown properties are skipped.
    pub fn decode_properties(&self, properties: &Map<String, Json>) -> Result<BTreeMap<String, Value>> {
        let mut values = BTreeMap::new();
        for (name, encoded) in properties {
            let Some(field) = self.fields.get(name) else {
                debug!(schema = %self.name, property = %name, "skipping unknown property");
                continue;
            };
            if let Some(value) = field
                .from_entity(encoded)
                .map_err(|e| e.with_context(&format!("{}.{}", self.name, name)))?
            {
                values.insert(name.clone(), value);
            }
        }

        for (name, field) in &self.fields {
            if field.is_required() && !values.contains_key(name) {
                return Err(Error::Decode(format!(
                    "{}.{} is required but missing from the payload",
                    self.name, name
                )));
            }
        }
        Ok(values)
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("fields", &self.fields)
            .field("noindex", &self.noindex)
            .field("locking", &self.locking)
            .finish()
    }
}

/// Definition-time assembly of a [`Schema`]
pub struct SchemaBuilder {
    name: String,
    kind: Option<String>,
    parents: Vec<Arc<Schema>>,
    fields: Vec<(String, Field)>,
    store_null: Option<bool>,
    locking: bool,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            parents: Vec::new(),
            fields: Vec::new(),
            store_null: None,
            locking: false,
        }
    }

    /// Inherit every field of `parent`. Earlier parents win over later ones.
    pub fn extends(mut self, parent: &Arc<Schema>) -> Self {
        self.parents.push(Arc::clone(parent));
        self
    }

    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.push((name.into(), field));
        self
    }

    /// Override the kind derived from the schema name
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Force the store-null policy of every field, inherited ones included
    pub fn store_null(mut self, store: bool) -> Self {
        self.store_null = Some(store);
        self
    }

    /// Add the internal lock flag used by `Transaction::lock`
    pub fn locking(mut self) -> Self {
        self.locking = true;
        self
    }

    pub fn build(self) -> Result<Arc<Schema>> {
        let SchemaBuilder {
            name,
            kind,
            parents,
            fields: own,
            store_null,
            locking,
        } = self;

        if name.is_empty() {
            return Err(Error::SchemaDefinition("schema name must not be empty".into()));
        }

        let mut fields: BTreeMap<String, Field> = BTreeMap::new();
        let mut locking = locking;
        for parent in parents.iter().rev() {
            locking |= parent.locking;
            for (field_name, field) in &parent.fields {
                if field_name != LOCK_FIELD {
                    fields.insert(field_name.clone(), field.clone());
                }
            }
        }

        let mut declared = BTreeSet::new();
        for (field_name, field) in own {
            check_field_name(&name, &field_name)?;
            if !declared.insert(field_name.clone()) {
                return Err(Error::SchemaDefinition(format!(
                    "{} declares field {:?} twice",
                    name, field_name
                )));
            }
            fields.insert(field_name, field);
        }

        if fields.is_empty() {
            return Err(Error::SchemaDefinition(format!("{} declares no fields", name)));
        }

        if let Some(store) = store_null {
            for field in fields.values_mut() {
                field.force_store_null(store);
            }
        }

        for (field_name, field) in &fields {
            field.default_value().map_err(|e| {
                Error::SchemaDefinition(format!(
                    "{}.{} has an invalid default: {}",
                    name, field_name, e
                ))
            })?;
        }

        if locking {
            fields.insert(LOCK_FIELD.to_string(), Field::boolean());
        }

        let kind = kind.unwrap_or_else(|| name.to_lowercase());
        check_kind(&kind)?;

        let noindex = fields
            .iter()
            .filter(|(_, field)| !field.is_indexed())
            .map(|(field_name, _)| field_name.clone())
            .collect();

        Ok(Arc::new(Schema {
            name,
            kind,
            fields,
            noindex,
            locking,
        }))
    }
}

fn check_field_name(schema: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::SchemaDefinition(format!("{} has a field with an empty name", schema)));
    }
    if name.starts_with('_') {
        return Err(Error::SchemaDefinition(format!(
            "{}.{}: names starting with '_' are reserved",
            schema, name
        )));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(Error::SchemaDefinition(format!(
            "{}.{}: name is reserved",
            schema, name
        )));
    }
    Ok(())
}

fn check_kind(kind: &str) -> Result<()> {
    if !KIND_REGEX.is_match(kind) {
        return Err(Error::SchemaDefinition(format!("invalid kind {:?}", kind)));
    }
    // __name__ kinds belong to the service
    if kind.len() > 4 && kind.starts_with("__") && kind.ends_with("__") {
        return Err(Error::SchemaDefinition(format!("kind {:?} is reserved", kind)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::Constraint;
    use serde_json::json;

    fn person() -> Arc<Schema> {
        Schema::builder("Person")
            .field("name", Field::string().required().indexed())
            .field("age", Field::integer().with_default(0))
            .build()
            .unwrap()
    }

    #[test]
    fn test_kind_derivation() {
        assert_eq!(person().kind(), "person");
        let custom = Schema::builder("Person")
            .kind("People")
            .field("name", Field::string())
            .build()
            .unwrap();
        assert_eq!(custom.kind(), "People");
        assert!(Schema::builder("X").kind("__stat__").field("a", Field::string()).build().is_err());
        assert!(Schema::builder("X").kind("has space").field("a", Field::string()).build().is_err());
    }

    #[test]
    fn test_check_kind_is_reusable() {
        for _ in 0..3 {
            assert!(check_kind("Ledger.v2-entries").is_ok());
            assert!(check_kind("_private").is_ok());
            assert!(check_kind("9lives").is_err());
            assert!(check_kind("__stat__").is_err());
        }
    }

    #[test]
    fn test_reserved_and_prefixed_names() {
        for bad in ["id", "key", "save", "_secret", ""] {
            let err = Schema::builder("Bad").field(bad, Field::string()).build().unwrap_err();
            assert!(matches!(err, Error::SchemaDefinition(_)), "{:?} accepted", bad);
        }
    }

    #[test]
    fn test_empty_and_duplicate_declarations() {
        assert!(Schema::builder("Empty").build().is_err());
        assert!(Schema::builder("Dup")
            .field("a", Field::string())
            .field("a", Field::integer())
            .build()
            .is_err());
    }

    #[test]
    fn test_invalid_default_rejected() {
        let err = Schema::builder("Bad")
            .field("n", Field::integer().with_default("nope"))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::SchemaDefinition(_)));

        let err = Schema::builder("Bad")
            .field("n", Field::integer().with_default(-1).constraint(Constraint::MinValue(0.0)))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("invalid default"));
    }

    #[test]
    fn test_noindex_set() {
        let schema = person();
        assert!(!schema.noindex().contains("name"));
        assert!(schema.noindex().contains("age"));
    }

    #[test]
    fn test_inheritance_child_wins() {
        let parent = person();
        let child = Schema::builder("Employee")
            .extends(&parent)
            .field("age", Field::string())
            .field("salary", Field::double())
            .build()
            .unwrap();

        assert_eq!(child.kind(), "employee");
        assert!(matches!(child.field("age").unwrap().kind(), crate::FieldKind::String));
        assert!(child.field("name").unwrap().is_required());

        let mut values = BTreeMap::new();
        child.write(&mut values, "age", Some(Value::Integer(30))).unwrap();
        assert_eq!(values.get("age"), Some(&Value::string("30")));
    }

    #[test]
    fn test_store_null_override() {
        let schema = Schema::builder("Sparse")
            .store_null(true)
            .field("a", Field::integer())
            .field("tags", Field::array(Field::string()))
            .build()
            .unwrap();
        let properties = schema.encode_properties(&BTreeMap::new()).unwrap();
        assert!(wire::is_null(&properties["a"]));
        assert!(wire::is_null(&properties["tags"]));
    }

    #[test]
    fn test_locking_adds_internal_field() {
        let schema = Schema::builder("Job")
            .locking()
            .field("title", Field::string())
            .build()
            .unwrap();
        assert!(schema.is_locking());
        assert!(schema.field(LOCK_FIELD).is_some());
        assert!(schema.noindex().contains(LOCK_FIELD));

        let child = Schema::builder("Subjob").extends(&schema).field("extra", Field::string()).build().unwrap();
        assert!(child.is_locking());
    }

    #[test]
    fn test_instantiate() {
        let schema = person();
        let mut raw = BTreeMap::new();
        raw.insert("name".to_string(), Value::string("Ada"));
        let values = schema.instantiate(raw).unwrap();
        assert_eq!(values.get("age"), Some(&Value::Integer(0)));

        assert!(matches!(schema.instantiate(BTreeMap::new()), Err(Error::Validation { .. })));

        let mut raw = BTreeMap::new();
        raw.insert("name".to_string(), Value::string("Ada"));
        raw.insert("height".to_string(), Value::Integer(170));
        assert!(matches!(schema.instantiate(raw), Err(Error::UnknownField(_))));
    }

    #[test]
    fn test_write_required_absent_fails() {
        let schema = person();
        let mut values = BTreeMap::new();
        let err = schema.write(&mut values, "name", None).unwrap_err();
        assert!(err.to_string().contains("Person.name is required"));
        assert!(matches!(schema.write(&mut values, "nope", None), Err(Error::UnknownField(_))));
    }

    #[test]
    fn test_properties_round_trip() {
        let schema = person();
        let mut values = BTreeMap::new();
        schema.write(&mut values, "name", Some(Value::string("Ada"))).unwrap();
        schema.write(&mut values, "age", Some(Value::Integer(36))).unwrap();

        let properties = schema.encode_properties(&values).unwrap();
        assert_eq!(properties["age"], json!({"integerValue": "36", "excludeFromIndexes": true}));
        assert!(properties["name"].get("excludeFromIndexes").is_none());
        assert_eq!(schema.decode_properties(&properties).unwrap(), values);
    }

    #[test]
    fn test_decode_skips_unknown_and_requires_required() {
        let schema = person();
        let properties = json!({
            "name": {"stringValue": "Ada"},
            "legacy": {"stringValue": "ignored"}
        });
        let values = schema.decode_properties(properties.as_object().unwrap()).unwrap();
        assert_eq!(values.len(), 1);

        let missing = json!({"age": {"integerValue": "1"}});
        assert!(matches!(
            schema.decode_properties(missing.as_object().unwrap()),
            Err(Error::Decode(_))
        ));
    }
}
