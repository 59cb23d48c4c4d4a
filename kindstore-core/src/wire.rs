/// Helpers for the service's tagged JSON value representation
///
/// Every property value is an object keyed by a single wire tag
/// (`{"integerValue": "5"}`), optionally carrying `excludeFromIndexes`.
use crate::{Error, Result};
use serde_json::{json, Value as Json};

pub const NULL_VALUE: &str = "nullValue";
pub const INTEGER_VALUE: &str = "integerValue";
pub const DOUBLE_VALUE: &str = "doubleValue";
pub const BOOLEAN_VALUE: &str = "booleanValue";
pub const STRING_VALUE: &str = "stringValue";
pub const TIMESTAMP_VALUE: &str = "timestampValue";
pub const BLOB_VALUE: &str = "blobValue";
pub const KEY_VALUE: &str = "keyValue";
pub const GEO_POINT_VALUE: &str = "geoPointValue";
pub const ARRAY_VALUE: &str = "arrayValue";
pub const ENTITY_VALUE: &str = "entityValue";

const EXCLUDE_FROM_INDEXES: &str = "excludeFromIndexes";

/// The explicit null marker
pub fn null_token() -> Json {
    json!({ NULL_VALUE: null })
}

pub fn is_null(value: &Json) -> bool {
    value.get(NULL_VALUE).is_some()
}

/// Flag an encoded property as not indexed.
///
/// Array values cannot carry the flag themselves, so it goes on each element.
pub fn mark_unindexed(value: &mut Json) {
    if let Some(values) = value
        .get_mut(ARRAY_VALUE)
        .and_then(|array| array.get_mut("values"))
        .and_then(Json::as_array_mut)
    {
        for element in values {
            mark_unindexed(element);
        }
        return;
    }
    if let Some(obj) = value.as_object_mut() {
        obj.insert(EXCLUDE_FROM_INDEXES.to_string(), Json::Bool(true));
    }
}

/// Doubles are JSON numbers, except the non-finite ones which travel as strings
pub fn encode_double(value: f64) -> Json {
    if value.is_nan() {
        json!("NaN")
    } else if value.is_infinite() {
        json!(if value > 0.0 { "Infinity" } else { "-Infinity" })
    } else {
        json!(value)
    }
}

pub fn decode_double(value: &Json) -> Result<f64> {
    match value {
        Json::Number(n) => n
            .as_f64()
            .ok_or_else(|| Error::Decode(format!("invalid double {}", n))),
        Json::String(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            other => other
                .parse::<f64>()
                .map_err(|e| Error::Decode(format!("invalid double {:?}: {}", other, e))),
        },
        other => Err(Error::Decode(format!("expected double, found {}", other))),
    }
}
