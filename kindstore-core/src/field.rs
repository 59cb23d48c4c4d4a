/// Typed field descriptors
///
/// A `Field` is an immutable slot description attached to a schema under a
/// name. It knows how to mold raw input into its native type, how to encode a
/// native value into the tagged wire form, and how to decode it back.
use crate::container::{Array, Mapping};
use crate::embedded::Embedded;
use crate::key::{decode_int64, Key};
use crate::schema::Schema;
use crate::validation::Constraint;
use crate::wire;
use crate::{Error, GeoPoint, Result, Value};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{json, Map, Value as Json};
use std::fmt;
use std::sync::Arc;

/// Value → value hook applied before molding; returning `None` clears the field
pub type Alteration = Arc<dyn Fn(Value) -> Option<Value> + Send + Sync>;

/// Zero-argument default producer
pub type Producer = Arc<dyn Fn() -> Value + Send + Sync>;

#[derive(Clone)]
pub enum DefaultValue {
    Fixed(Value),
    Produced(Producer),
}

impl DefaultValue {
    fn produce(&self) -> Value {
        match self {
            DefaultValue::Fixed(value) => value.clone(),
            DefaultValue::Produced(producer) => producer(),
        }
    }
}

/// Field variant, carrying what each variant needs to convert values
#[derive(Clone)]
pub enum FieldKind {
    Integer,
    Double,
    Boolean,
    String,
    Timestamp,
    Blob,
    Key,
    GeoPoint,
    /// Ordered list; every element validates against the content field
    Array(Arc<Field>),
    /// String-keyed map; every value validates against the content field
    Mapping(Arc<Field>),
    /// Nested record
    Embedded(Arc<Schema>),
}

impl FieldKind {
    /// Tag naming the payload in the wire representation
    pub fn wire_tag(&self) -> &'static str {
        match self {
            FieldKind::Integer => wire::INTEGER_VALUE,
            FieldKind::Double => wire::DOUBLE_VALUE,
            FieldKind::Boolean => wire::BOOLEAN_VALUE,
            FieldKind::String => wire::STRING_VALUE,
            FieldKind::Timestamp => wire::TIMESTAMP_VALUE,
            FieldKind::Blob => wire::BLOB_VALUE,
            FieldKind::Key => wire::KEY_VALUE,
            FieldKind::GeoPoint => wire::GEO_POINT_VALUE,
            FieldKind::Array(_) => wire::ARRAY_VALUE,
            FieldKind::Mapping(_) | FieldKind::Embedded(_) => wire::ENTITY_VALUE,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Integer => "integer",
            FieldKind::Double => "double",
            FieldKind::Boolean => "boolean",
            FieldKind::String => "string",
            FieldKind::Timestamp => "timestamp",
            FieldKind::Blob => "blob",
            FieldKind::Key => "key",
            FieldKind::GeoPoint => "geo point",
            FieldKind::Array(_) => "array",
            FieldKind::Mapping(_) => "mapping",
            FieldKind::Embedded(_) => "embedded record",
        }
    }
}

#[derive(Clone)]
pub struct Field {
    kind: FieldKind,
    default: Option<DefaultValue>,
    required: bool,
    indexed: bool,
    store_null: bool,
    alter: Option<Alteration>,
    constraints: Vec<Constraint>,
}

impl Field {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            default: None,
            required: false,
            indexed: false,
            store_null: false,
            alter: None,
            constraints: Vec::new(),
        }
    }

    pub fn integer() -> Self {
        Self::new(FieldKind::Integer)
    }

    pub fn double() -> Self {
        Self::new(FieldKind::Double)
    }

    pub fn boolean() -> Self {
        Self::new(FieldKind::Boolean)
    }

    pub fn string() -> Self {
        Self::new(FieldKind::String)
    }

    pub fn timestamp() -> Self {
        Self::new(FieldKind::Timestamp)
    }

    pub fn blob() -> Self {
        Self::new(FieldKind::Blob)
    }

    pub fn key() -> Self {
        Self::new(FieldKind::Key)
    }

    pub fn geo_point() -> Self {
        Self::new(FieldKind::GeoPoint)
    }

    pub fn array(content: Field) -> Self {
        Self::new(FieldKind::Array(Arc::new(content)))
    }

    pub fn mapping(content: Field) -> Self {
        Self::new(FieldKind::Mapping(Arc::new(content)))
    }

    pub fn embedded(schema: &Arc<Schema>) -> Self {
        Self::new(FieldKind::Embedded(Arc::clone(schema)))
    }

    /// Mark the field as required at construction time
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Include the field in the remote indexes
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Encode an absent value as an explicit null instead of omitting it
    pub fn store_null(mut self, store: bool) -> Self {
        self.store_null = store;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Fixed(value.into()));
        self
    }

    pub fn with_default_fn<F>(mut self, producer: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::Produced(Arc::new(producer)));
        self
    }

    pub fn alter<F>(mut self, alteration: F) -> Self
    where
        F: Fn(Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.alter = Some(Arc::new(alteration));
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    pub fn stores_null(&self) -> bool {
        self.store_null
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    pub fn wire_tag(&self) -> &'static str {
        self.kind.wire_tag()
    }

    /// Force the store-null policy on this field and on container contents
    pub(crate) fn force_store_null(&mut self, store: bool) {
        self.store_null = store;
        match &mut self.kind {
            FieldKind::Array(content) | FieldKind::Mapping(content) => {
                Arc::make_mut(content).force_store_null(store);
            }
            _ => {}
        }
    }

    /// Produce the default, molded like an assigned value
    pub fn default_value(&self) -> Result<Option<Value>> {
        match &self.default {
            Some(default) => self.mold(Some(default.produce())),
            None => Ok(None),
        }
    }

    /// Convert a raw value into this field's native type.
    ///
    /// Alteration runs first; an absent result short-circuits every check.
    pub fn mold(&self, raw: Option<Value>) -> Result<Option<Value>> {
        let value = match (raw, &self.alter) {
            (Some(value), Some(alter)) => alter(value),
            (raw, _) => raw,
        };
        let Some(value) = value else {
            return Ok(None);
        };

        let value = self.coerce(value)?;
        for constraint in &self.constraints {
            constraint.check(&value)?;
        }
        Ok(Some(value))
    }

    /// Mold a value that must end up present (container elements)
    pub(crate) fn mold_present(&self, raw: Value) -> Result<Value> {
        self.mold(Some(raw))?
            .ok_or_else(|| Error::validation(Option::<Value>::None, "container elements cannot be absent"))
    }

    fn coerce(&self, value: Value) -> Result<Value> {
        match &self.kind {
            FieldKind::Integer => match value {
                Value::Integer(_) => Ok(value),
                Value::Double(d) if d.is_finite() && d.abs() < i64::MAX as f64 => {
                    Ok(Value::Integer(d.trunc() as i64))
                }
                Value::Boolean(b) => Ok(Value::Integer(b as i64)),
                Value::String(ref s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|e| Error::validation(&value, e)),
                other => Err(mismatch(&other, &self.kind)),
            },
            FieldKind::Double => match value {
                Value::Double(_) => Ok(value),
                Value::Integer(i) => Ok(Value::Double(i as f64)),
                Value::String(ref s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Double)
                    .map_err(|e| Error::validation(&value, e)),
                other => Err(mismatch(&other, &self.kind)),
            },
            FieldKind::Boolean => match value {
                Value::Boolean(_) => Ok(value),
                Value::Integer(i) => Ok(Value::Boolean(i != 0)),
                Value::String(ref s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" => Ok(Value::Boolean(true)),
                    "false" | "0" => Ok(Value::Boolean(false)),
                    _ => Err(Error::validation(&value, "not a boolean literal")),
                },
                other => Err(mismatch(&other, &self.kind)),
            },
            FieldKind::String => match value {
                Value::String(_) => Ok(value),
                Value::Integer(i) => Ok(Value::String(i.to_string())),
                Value::Double(d) => Ok(Value::String(d.to_string())),
                Value::Boolean(b) => Ok(Value::String(b.to_string())),
                other => Err(mismatch(&other, &self.kind)),
            },
            FieldKind::Timestamp => match value {
                Value::Timestamp(_) => Ok(value),
                Value::String(ref s) => DateTime::parse_from_rfc3339(s.trim())
                    .map(|ts| Value::Timestamp(ts.with_timezone(&Utc)))
                    .map_err(|e| Error::validation(&value, e)),
                // epoch milliseconds
                Value::Integer(ms) => Utc
                    .timestamp_millis_opt(ms)
                    .single()
                    .map(Value::Timestamp)
                    .ok_or_else(|| Error::validation(&value, "timestamp out of range")),
                other => Err(mismatch(&other, &self.kind)),
            },
            FieldKind::Blob => match value {
                Value::Blob(_) => Ok(value),
                Value::String(s) => Ok(Value::Blob(Bytes::from(s.into_bytes()))),
                other => Err(mismatch(&other, &self.kind)),
            },
            FieldKind::Key => match value {
                Value::Key(_) => Ok(value),
                other => Err(mismatch(&other, &self.kind)),
            },
            FieldKind::GeoPoint => {
                let point = match &value {
                    Value::GeoPoint(point) => *point,
                    Value::Dict(map) => {
                        let lat = map.get("latitude").and_then(number);
                        let lon = map.get("longitude").and_then(number);
                        match (lat, lon) {
                            (Some(lat), Some(lon)) => GeoPoint::new(lat, lon),
                            _ => {
                                return Err(Error::validation(
                                    &value,
                                    "expected numeric latitude and longitude",
                                ))
                            }
                        }
                    }
                    Value::List(items) if items.len() == 2 => {
                        match (number(&items[0]), number(&items[1])) {
                            (Some(lat), Some(lon)) => GeoPoint::new(lat, lon),
                            _ => {
                                return Err(Error::validation(
                                    &value,
                                    "expected [latitude, longitude]",
                                ))
                            }
                        }
                    }
                    other => return Err(mismatch(other, &self.kind)),
                };
                if !(-90.0..=90.0).contains(&point.latitude)
                    || !(-180.0..=180.0).contains(&point.longitude)
                {
                    return Err(Error::validation(&value, "coordinates out of range"));
                }
                Ok(Value::GeoPoint(point))
            }
            FieldKind::Array(content) => match value {
                Value::Array(array) if Arc::ptr_eq(array.content(), content) => {
                    Ok(Value::Array(array))
                }
                Value::Array(array) => Array::from_values(Arc::clone(content), array.into_vec())
                    .map(Value::Array)
                    .map_err(|e| e.with_context("array element")),
                Value::List(items) => Array::from_values(Arc::clone(content), items)
                    .map(Value::Array)
                    .map_err(|e| e.with_context("array element")),
                other => Err(mismatch(&other, &self.kind)),
            },
            FieldKind::Mapping(content) => match value {
                Value::Mapping(mapping) if Arc::ptr_eq(mapping.content(), content) => {
                    Ok(Value::Mapping(mapping))
                }
                Value::Mapping(mapping) => {
                    Mapping::from_entries(Arc::clone(content), mapping.into_entries())
                        .map(Value::Mapping)
                        .map_err(|e| e.with_context("mapping entry"))
                }
                Value::Dict(entries) => Mapping::from_entries(Arc::clone(content), entries)
                    .map(Value::Mapping)
                    .map_err(|e| e.with_context("mapping entry")),
                other => Err(mismatch(&other, &self.kind)),
            },
            FieldKind::Embedded(schema) => match value {
                Value::Embedded(record) if Arc::ptr_eq(record.schema(), schema) => {
                    Ok(Value::Embedded(record))
                }
                // A record of another schema is reinterpreted field by field
                Value::Embedded(record) => Embedded::new(schema, record.into_values())
                    .map(Value::Embedded)
                    .map_err(|e| e.with_context(schema.name())),
                Value::Dict(values) => Embedded::new(schema, values)
                    .map(Value::Embedded)
                    .map_err(|e| e.with_context(schema.name())),
                other => Err(mismatch(&other, &self.kind)),
            },
        }
    }

    /// Encode a container element. Elements always keep their slot: a value
    /// that would be omitted as a property (an empty record or container)
    /// is sent as an empty tagged payload instead.
    fn to_element(&self, value: &Value) -> Result<Json> {
        if let Some(encoded) = self.to_entity(Some(value))? {
            if !wire::is_null(&encoded) {
                return Ok(encoded);
            }
        }
        let mut tagged = Map::new();
        tagged.insert(self.wire_tag().to_string(), json!({}));
        Ok(Json::Object(tagged))
    }

    /// Decode a container element; empty payloads come back as empty values
    fn from_element(&self, encoded: &Json) -> Result<Value> {
        if let Some(value) = self.from_entity(encoded)? {
            return Ok(value);
        }
        self.empty_value().ok_or_else(|| {
            Error::Decode(format!("{} element cannot be null: {}", self.kind.name(), encoded))
        })
    }

    /// The present-but-empty value of a container kind
    fn empty_value(&self) -> Option<Value> {
        match &self.kind {
            FieldKind::Array(content) => Some(Value::Array(Array::new(Arc::clone(content)))),
            FieldKind::Mapping(content) => Some(Value::Mapping(Mapping::new(Arc::clone(content)))),
            FieldKind::Embedded(schema) => Some(Value::Embedded(Embedded::from_decoded(
                schema,
                std::collections::BTreeMap::new(),
            ))),
            _ => None,
        }
    }

    fn null_encoding(&self) -> Option<Json> {
        if self.store_null {
            Some(wire::null_token())
        } else {
            None
        }
    }

    /// Encode a native value. `None` means the property is omitted entirely.
    pub fn to_entity(&self, value: Option<&Value>) -> Result<Option<Json>> {
        let Some(value) = value else {
            return Ok(self.null_encoding());
        };

        let payload = match (&self.kind, value) {
            (FieldKind::Integer, Value::Integer(i)) => json!(i.to_string()),
            (FieldKind::Double, Value::Double(d)) => wire::encode_double(*d),
            (FieldKind::Boolean, Value::Boolean(b)) => json!(b),
            (FieldKind::String, Value::String(s)) => json!(s),
            (FieldKind::Timestamp, Value::Timestamp(ts)) => {
                json!(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            (FieldKind::Blob, Value::Blob(b)) => json!(BASE64.encode(b)),
            (FieldKind::Key, Value::Key(key)) => key.to_json(),
            (FieldKind::GeoPoint, Value::GeoPoint(point)) => {
                json!({ "latitude": point.latitude, "longitude": point.longitude })
            }
            (FieldKind::Array(content), Value::Array(array)) => {
                let values = array
                    .iter()
                    .map(|item| content.to_element(item))
                    .collect::<Result<Vec<_>>>()?;
                if values.is_empty() {
                    return Ok(self.null_encoding());
                }
                json!({ "values": values })
            }
            (FieldKind::Mapping(content), Value::Mapping(mapping)) => {
                let mut properties = Map::new();
                for (name, item) in mapping.iter() {
                    properties.insert(name.clone(), content.to_element(item)?);
                }
                if properties.is_empty() {
                    return Ok(self.null_encoding());
                }
                json!({ "properties": properties })
            }
            (FieldKind::Embedded(schema), Value::Embedded(record)) => {
                let properties = schema.encode_properties(record.values())?;
                if properties.is_empty() {
                    return Ok(self.null_encoding());
                }
                json!({ "properties": properties })
            }
            (kind, other) => return Err(mismatch(other, kind)),
        };

        let mut tagged = Map::new();
        tagged.insert(self.wire_tag().to_string(), payload);
        Ok(Some(Json::Object(tagged)))
    }

    /// Decode a wire value. The null token decodes to `None`.
    pub fn from_entity(&self, encoded: &Json) -> Result<Option<Value>> {
        if wire::is_null(encoded) {
            return Ok(None);
        }

        let tag = self.wire_tag();
        let payload = encoded
            .get(tag)
            .ok_or_else(|| Error::Decode(format!("expected {} payload, found {}", tag, encoded)))?;

        let value = match &self.kind {
            FieldKind::Integer => Value::Integer(decode_int64(payload)?),
            FieldKind::Double => Value::Double(wire::decode_double(payload)?),
            FieldKind::Boolean => Value::Boolean(
                payload
                    .as_bool()
                    .ok_or_else(|| Error::Decode(format!("expected boolean, found {}", payload)))?,
            ),
            FieldKind::String => Value::String(expect_str(payload)?.to_string()),
            FieldKind::Timestamp => {
                let text = expect_str(payload)?;
                let ts = DateTime::parse_from_rfc3339(text)
                    .map_err(|e| Error::Decode(format!("invalid timestamp {:?}: {}", text, e)))?;
                Value::Timestamp(ts.with_timezone(&Utc))
            }
            FieldKind::Blob => {
                let text = expect_str(payload)?;
                let bytes = BASE64
                    .decode(text)
                    .map_err(|e| Error::Decode(format!("invalid base64 blob: {}", e)))?;
                Value::Blob(Bytes::from(bytes))
            }
            FieldKind::Key => Value::Key(Key::from_json(payload)?),
            // Zero coordinates are omitted on the wire
            FieldKind::GeoPoint => Value::GeoPoint(GeoPoint::new(
                payload.get("latitude").and_then(Json::as_f64).unwrap_or(0.0),
                payload.get("longitude").and_then(Json::as_f64).unwrap_or(0.0),
            )),
            FieldKind::Array(content) => {
                let values = match payload.get("values").and_then(Json::as_array) {
                    Some(values) if !values.is_empty() => values,
                    _ => return Ok(None),
                };
                let items = values
                    .iter()
                    .map(|element| content.from_element(element))
                    .collect::<Result<Vec<_>>>()?;
                Value::Array(Array::from_decoded(Arc::clone(content), items))
            }
            FieldKind::Mapping(content) => {
                let properties = match payload.get("properties").and_then(Json::as_object) {
                    Some(properties) if !properties.is_empty() => properties,
                    _ => return Ok(None),
                };
                let mut entries = std::collections::BTreeMap::new();
                for (name, element) in properties {
                    entries.insert(name.clone(), content.from_element(element)?);
                }
                Value::Mapping(Mapping::from_decoded(Arc::clone(content), entries))
            }
            FieldKind::Embedded(schema) => {
                let empty = Map::new();
                let properties = payload
                    .get("properties")
                    .and_then(Json::as_object)
                    .unwrap_or(&empty);
                let values = schema.decode_properties(properties)?;
                Value::Embedded(Embedded::from_decoded(schema, values))
            }
        };
        Ok(Some(value))
    }
}

fn mismatch(value: &Value, kind: &FieldKind) -> Error {
    Error::validation(
        value,
        format!("expected {}, found {}", kind.name(), value.type_name()),
    )
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Double(d) => Some(*d),
        Value::Integer(i) => Some(*i as f64),
        _ => None,
    }
}

fn expect_str(payload: &Json) -> Result<&str> {
    payload
        .as_str()
        .ok_or_else(|| Error::Decode(format!("expected string, found {}", payload)))
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Field");
        out.field("kind", &self.kind.name());
        match &self.kind {
            FieldKind::Array(content) | FieldKind::Mapping(content) => {
                out.field("content", content);
            }
            FieldKind::Embedded(schema) => {
                out.field("schema", &schema.name());
            }
            _ => {}
        }
        out.field("required", &self.required)
            .field("indexed", &self.indexed)
            .field("store_null", &self.store_null)
            .field("has_default", &self.default.is_some())
            .field("constraints", &self.constraints)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use proptest::prelude::*;

    fn round_trip(field: &Field, value: Value) -> Option<Value> {
        let molded = field.mold(Some(value)).unwrap();
        let encoded = field.to_entity(molded.as_ref()).unwrap().unwrap();
        field.from_entity(&encoded).unwrap()
    }

    fn address_schema() -> Arc<Schema> {
        Schema::builder("Address")
            .field("street", Field::string())
            .field("number", Field::integer())
            .build()
            .unwrap()
    }

    #[test]
    fn test_integer_mold_conversions() {
        let field = Field::integer();
        assert_eq!(field.mold(Some(Value::string(" 42 "))).unwrap(), Some(Value::Integer(42)));
        assert_eq!(field.mold(Some(Value::Double(3.7))).unwrap(), Some(Value::Integer(3)));
        assert_eq!(field.mold(Some(Value::Boolean(true))).unwrap(), Some(Value::Integer(1)));

        let err = field.mold(Some(Value::string("forty"))).unwrap_err();
        match err {
            Error::Validation { value, cause } => {
                assert!(value.contains("forty"));
                assert!(cause.contains("invalid digit"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_absent_skips_checks() {
        let field = Field::integer().required().constraint(Constraint::MinValue(10.0));
        assert_eq!(field.mold(None).unwrap(), None);
    }

    #[test]
    fn test_alteration_runs_first() {
        let field = Field::string().alter(|v| match v {
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(Value::String(s.to_lowercase())),
            other => Some(other),
        });
        assert_eq!(field.mold(Some(Value::string("ABC"))).unwrap(), Some(Value::string("abc")));
        assert_eq!(field.mold(Some(Value::string(""))).unwrap(), None);
    }

    #[test]
    fn test_constraint_failure_is_validation_error() {
        let field = Field::string().constraint(Constraint::MaxLength(2));
        assert!(matches!(
            field.mold(Some(Value::string("abc"))),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn test_store_null_policy() {
        let omitted = Field::integer();
        assert_eq!(omitted.to_entity(None).unwrap(), None);

        let explicit = Field::integer().store_null(true);
        let encoded = explicit.to_entity(None).unwrap().unwrap();
        assert!(wire::is_null(&encoded));
        assert_eq!(explicit.from_entity(&encoded).unwrap(), None);
    }

    #[test]
    fn test_integer_wire_is_string() {
        let encoded = Field::integer().to_entity(Some(&Value::Integer(5))).unwrap().unwrap();
        assert_eq!(encoded, json!({"integerValue": "5"}));
    }

    #[test]
    fn test_empty_array_encodes_to_absence() {
        let field = Field::array(Field::integer());
        let empty = field.mold(Some(Value::List(vec![]))).unwrap();
        assert!(empty.is_some());
        assert_eq!(field.to_entity(empty.as_ref()).unwrap(), None);

        let with_null = Field::array(Field::integer()).store_null(true);
        let encoded = with_null.to_entity(empty.as_ref()).unwrap().unwrap();
        assert!(wire::is_null(&encoded));
    }

    #[test]
    fn test_array_mold_validates_elements() {
        let field = Field::array(Field::integer());
        let molded = field.mold(Some(Value::list(["1", "2"]))).unwrap().unwrap();
        let array = molded.as_array().unwrap();
        assert_eq!(array.get(1), Some(&Value::Integer(2)));

        let err = field.mold(Some(Value::list(["1", "x"]))).unwrap_err();
        assert!(err.to_string().contains("array element"));
    }

    #[test]
    fn test_embedded_from_dict() {
        let schema = address_schema();
        let field = Field::embedded(&schema);
        let molded = field
            .mold(Some(Value::dict([("street", Value::from("Main")), ("number", Value::from("12"))])))
            .unwrap()
            .unwrap();
        let record = molded.as_embedded().unwrap();
        assert_eq!(record.get("number").unwrap(), Some(Value::Integer(12)));
    }

    #[test]
    fn test_embedded_without_values_encodes_to_absence() {
        let schema = address_schema();
        let field = Field::embedded(&schema);
        let molded = field.mold(Some(Value::Dict(Default::default()))).unwrap();
        assert_eq!(field.to_entity(molded.as_ref()).unwrap(), None);
    }

    #[test]
    fn test_array_keeps_empty_records_in_place() {
        let point = Schema::builder("Pt").field("x", Field::integer()).build().unwrap();
        let field = Field::array(Field::embedded(&point));
        let value = Value::list([Value::Dict(Default::default()), Value::dict([("x", 1)])]);
        let molded = field.mold(Some(value.clone())).unwrap();

        let encoded = field.to_entity(molded.as_ref()).unwrap().unwrap();
        assert_eq!(encoded["arrayValue"]["values"].as_array().unwrap().len(), 2);
        assert_eq!(encoded["arrayValue"]["values"][0], json!({"entityValue": {}}));

        let decoded = round_trip(&field, value);
        assert_eq!(decoded, molded);
        let items = decoded.unwrap();
        let items = items.as_array().unwrap();
        assert!(items.get(0).unwrap().as_embedded().unwrap().values().is_empty());
        assert_eq!(
            items.get(1).unwrap().as_embedded().unwrap().get("x").unwrap(),
            Some(Value::Integer(1))
        );
    }

    #[test]
    fn test_null_scalar_element_is_rejected() {
        let field = Field::array(Field::integer());
        let encoded = json!({"arrayValue": {"values": [{"integerValue": "1"}, {"nullValue": null}]}});
        assert!(matches!(field.from_entity(&encoded), Err(Error::Decode(_))));
    }

    #[test]
    fn test_mapping_keeps_empty_records() {
        let point = Schema::builder("Pt").field("x", Field::integer()).build().unwrap();
        let field = Field::mapping(Field::embedded(&point));
        let value = Value::dict([("origin", Value::Dict(Default::default()))]);
        let molded = field.mold(Some(value.clone())).unwrap();
        assert_eq!(round_trip(&field, value), molded);
    }

    #[test]
    fn test_embedded_round_trip() {
        let schema = address_schema();
        let field = Field::embedded(&schema);
        let value = Value::dict([("street", Value::from("Main")), ("number", Value::from(12))]);
        let molded = field.mold(Some(value.clone())).unwrap();
        assert_eq!(round_trip(&field, value), molded);
    }

    #[test]
    fn test_mapping_round_trip() {
        let field = Field::mapping(Field::double());
        let value = Value::dict([("a", 1.5), ("b", -2.0)]);
        let molded = field.mold(Some(value.clone())).unwrap();
        assert_eq!(round_trip(&field, value), molded);
    }

    #[test]
    fn test_geo_point_round_trip_and_range() {
        let field = Field::geo_point();
        let point = Value::GeoPoint(GeoPoint::new(51.5, -0.12));
        assert_eq!(round_trip(&field, point.clone()), Some(point));

        let from_list = field.mold(Some(Value::list([10.0, 20.0]))).unwrap();
        assert_eq!(from_list, Some(Value::GeoPoint(GeoPoint::new(10.0, 20.0))));
        assert!(field.mold(Some(Value::list([91.0, 0.0]))).is_err());
    }

    #[test]
    fn test_key_and_blob_round_trip() {
        let key = Value::Key(Key::with_name("proj", "user", "alice"));
        assert_eq!(round_trip(&Field::key(), key.clone()), Some(key));

        let blob = Value::blob(vec![0u8, 159, 146, 150]);
        assert_eq!(round_trip(&Field::blob(), blob.clone()), Some(blob));
    }

    #[test]
    fn test_timestamp_round_trip() {
        let field = Field::timestamp();
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_000).single().unwrap();
        assert_eq!(round_trip(&field, Value::Timestamp(ts)), Some(Value::Timestamp(ts)));
        assert_eq!(
            field.mold(Some(Value::Integer(1_000))).unwrap(),
            Some(Value::Timestamp(Utc.timestamp_millis_opt(1_000).single().unwrap()))
        );
    }

    #[test]
    fn test_decode_wrong_tag() {
        let err = Field::integer().from_entity(&json!({"stringValue": "x"})).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_default_value_is_molded() {
        let field = Field::array(Field::integer()).with_default_fn(|| Value::list([1, 2]));
        let default = field.default_value().unwrap().unwrap();
        assert_eq!(default.as_array().map(|a| a.len()), Some(2));
    }

    proptest! {
        #[test]
        fn prop_integer_round_trip(i in any::<i64>()) {
            prop_assert_eq!(round_trip(&Field::integer(), Value::Integer(i)), Some(Value::Integer(i)));
        }

        #[test]
        fn prop_double_round_trip(d in any::<f64>().prop_filter("finite", |d| d.is_finite())) {
            prop_assert_eq!(round_trip(&Field::double(), Value::Double(d)), Some(Value::Double(d)));
        }

        #[test]
        fn prop_string_round_trip(s in ".*") {
            prop_assert_eq!(round_trip(&Field::string(), Value::string(s.clone())), Some(Value::string(s)));
        }

        #[test]
        fn prop_boolean_round_trip(b in any::<bool>()) {
            prop_assert_eq!(round_trip(&Field::boolean(), Value::Boolean(b)), Some(Value::Boolean(b)));
        }

        #[test]
        fn prop_array_round_trip(items in prop::collection::vec(any::<i64>(), 1..16)) {
            let field = Field::array(Field::integer());
            let value = Value::list(items);
            let molded = field.mold(Some(value.clone())).unwrap();
            prop_assert_eq!(round_trip(&field, value), molded);
        }

        #[test]
        fn prop_embedded_round_trip(street in "[a-z ]{1,20}", number in any::<i64>()) {
            let schema = address_schema();
            let field = Field::embedded(&schema);
            let value = Value::dict([("street", Value::from(street)), ("number", Value::from(number))]);
            let molded = field.mold(Some(value.clone())).unwrap();
            prop_assert_eq!(round_trip(&field, value), molded);
        }
    }
}
