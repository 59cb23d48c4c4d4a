use crate::container::{Array, Mapping};
use crate::embedded::Embedded;
use crate::key::Key;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Geographic coordinate stored as `geoPointValue`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Native field value
///
/// The typed variants are what fields store. `List` and `Dict` are raw input
/// shapes that a field promotes into `Array`, `Mapping` or `Embedded` when the
/// value is assigned.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Double(f64),
    Boolean(bool),
    String(String),
    /// UTC instant, microsecond precision on the wire
    Timestamp(DateTime<Utc>),
    Blob(Bytes),
    Key(Key),
    GeoPoint(GeoPoint),
    /// Homogeneous list checked against a content field
    Array(Array),
    /// String-keyed map checked against a content field
    Mapping(Mapping),
    /// Nested record with its own schema
    Embedded(Embedded),
    /// Raw list, not yet checked
    List(Vec<Value>),
    /// Raw dictionary, not yet checked
    Dict(BTreeMap<String, Value>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn blob(b: impl Into<Bytes>) -> Self {
        Value::Blob(b.into())
    }

    pub fn list<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    pub fn dict<K: Into<String>, V: Into<Value>>(entries: impl IntoIterator<Item = (K, V)>) -> Self {
        Value::Dict(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Short type label used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Double(_) => "double",
            Value::Boolean(_) => "boolean",
            Value::String(_) => "string",
            Value::Timestamp(_) => "timestamp",
            Value::Blob(_) => "blob",
            Value::Key(_) => "key",
            Value::GeoPoint(_) => "geo point",
            Value::Array(_) => "array",
            Value::Mapping(_) => "mapping",
            Value::Embedded(_) => "embedded record",
            Value::List(_) => "list",
            Value::Dict(_) => "dictionary",
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Bytes> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_key(&self) -> Option<&Key> {
        match self {
            Value::Key(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_geo_point(&self) -> Option<GeoPoint> {
        match self {
            Value::GeoPoint(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Value::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_mapping_mut(&mut self) -> Option<&mut Mapping> {
        match self {
            Value::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_embedded(&self) -> Option<&Embedded> {
        match self {
            Value::Embedded(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_embedded_mut(&mut self) -> Option<&mut Embedded> {
        match self {
            Value::Embedded(e) => Some(e),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Blob(v)
    }
}

impl From<Key> for Value {
    fn from(v: Key) -> Self {
        Value::Key(v)
    }
}

impl From<GeoPoint> for Value {
    fn from(v: GeoPoint) -> Self {
        Value::GeoPoint(v)
    }
}

impl From<Array> for Value {
    fn from(v: Array) -> Self {
        Value::Array(v)
    }
}

impl From<Mapping> for Value {
    fn from(v: Mapping) -> Self {
        Value::Mapping(v)
    }
}

impl From<Embedded> for Value {
    fn from(v: Embedded) -> Self {
        Value::Embedded(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::list(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Dict(v)
    }
}
